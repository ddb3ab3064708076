pub mod amqp;
pub mod local;
pub mod memory;
pub mod postgres;

pub use amqp::AmqpGateway;
pub use local::LocalStorage;
pub use memory::{InMemoryBroker, InMemoryRowStore};
pub use postgres::PgRowStore;
