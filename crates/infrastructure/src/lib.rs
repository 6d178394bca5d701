pub mod database;
pub mod memory;
pub mod transport;

pub use database::{DatabaseManager, SqliteLeaseStore};
pub use memory::*;
pub use transport::InMemoryTaskTransport;
