//! Port implementations: in-memory state, a durable JSON snapshot store, and an
//! in-process payment gateway.

pub mod file;
pub mod memory;
pub mod payment;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use payment::InMemoryPaymentGateway;
