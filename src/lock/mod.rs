//! Ownership-safe distributed mutual exclusion over the shared store.

mod distributed_lock;


pub use distributed_lock::*;
