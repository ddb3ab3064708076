pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{InMemoryBroker, InMemoryRowStore, LocalStorage};
pub use app::{run, Job};
pub use config::Settings;
pub use core::engine::{StageEngine, StageOutcome};
pub use utils::error::{EtlError, Result};
