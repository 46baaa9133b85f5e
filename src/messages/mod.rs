#[cfg(test)]
pub mod memory;
pub mod models;
pub mod repository;

#[cfg(test)]
pub use memory::InMemoryMessageRepository;
pub use models::MessageRecord;
pub use repository::{PgMessageRepository, RecordStore};
