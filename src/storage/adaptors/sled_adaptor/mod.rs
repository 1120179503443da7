pub mod sled_backing_store;

pub use sled_backing_store::*;
