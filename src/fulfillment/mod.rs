//! Order fulfillment: drains admitted orders from the stream into the
//! backing store.
//!
//! Entries are acknowledged only after the order row is persisted, so any
//! entry a worker crashed on stays in its pending list and is replayed by the
//! next worker started under the same consumer name.

mod fulfillment_worker;


pub use fulfillment_worker::*;
