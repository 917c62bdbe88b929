pub mod store;

pub use store::{CommandOperations, EventPolicy, Operation, StoreConfig, TypeConfig};
