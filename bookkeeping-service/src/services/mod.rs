pub mod database;
pub mod documents;
pub mod error;
pub mod hierarchy;
pub mod memory;
pub mod metrics;
pub mod quantity;
pub mod returns;
pub mod sequence;
pub mod store;

pub use database::MongoStore;
pub use documents::DocumentService;
pub use error::BookkeepingError;
pub use hierarchy::HierarchyManager;
pub use memory::MemoryStore;
pub use quantity::QuantityLedger;
pub use returns::ReturnProcessor;
pub use sequence::SequenceAllocator;
pub use store::Store;
