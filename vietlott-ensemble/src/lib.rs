pub mod analysis;
pub mod artifacts;
pub mod config;
pub mod cycle;
pub mod display;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod import;
pub mod models;
pub mod pipeline;

pub use error::{Error, Result};
