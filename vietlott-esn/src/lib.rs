pub mod config;
pub mod encoding;
pub mod linalg;
pub mod metrics;
pub mod reservoir;
pub mod training;

pub use config::{Encoding, EsnConfig, SequenceMetrics};
pub use training::SequenceModel;
