pub mod backup;
pub mod config;
pub mod config_manager;
pub mod constants;
pub mod database;
pub mod db;
pub mod error;
pub mod producer;
pub mod remote_storage;
pub mod scheduler;
pub mod store;
pub mod target;

pub use error::{BackupError, Result};
