pub mod error;
pub mod fs;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use fs::FsStore;
pub use memory::InMemoryStore;
pub use store::{EventFilter, StateStore};
