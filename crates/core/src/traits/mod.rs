pub mod collaborators;
pub mod lease_store;
pub mod repository;
pub mod transport;

pub use collaborators::*;
pub use lease_store::*;
pub use repository::*;
pub use transport::*;
