//! Login sessions kept in the shared store.
//!
//! A request carries an opaque token; resolving it yields the caller's
//! [`UserContext`], which is then passed explicitly to the operations acting
//! on the caller's behalf.

mod session_store;


pub use session_store::*;
