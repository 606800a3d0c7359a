pub mod clock;
pub mod in_memory;
pub mod notifications;
pub mod processors;
pub mod registry;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
