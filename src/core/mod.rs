pub mod cleaning;
pub mod engine;
pub mod envelope;
pub mod projection;
pub mod schema;
pub mod table;

pub use crate::utils::error::Result;
