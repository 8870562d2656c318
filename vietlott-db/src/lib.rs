pub mod db;
pub mod models;
pub mod retry;
pub mod store;

pub use rusqlite;
