pub mod alerts;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod git;
pub mod links;
pub mod metrics;
pub mod model;
pub mod planning;
pub mod store;
pub mod util;
pub mod views;
pub mod window;

pub use error::{NexusError, Result};
