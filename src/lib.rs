pub mod archive;
pub mod cmd;
pub mod command;
pub mod config;
pub mod cookies;
mod error;
pub mod events;
pub mod inspect;
pub mod jobs;
pub mod logging;
pub mod paths;
pub mod scrape;
pub mod tools;

pub use error::{EngineError, Result};
