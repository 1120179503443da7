pub mod mem_backing_store;

pub use mem_backing_store::*;
