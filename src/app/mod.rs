pub mod runner;
pub mod stages;

pub use runner::{run, Job};
