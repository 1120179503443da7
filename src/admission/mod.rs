//! Atomic purchase admission.
//!
//! One indivisible step in the shared store turns a purchase attempt into
//! either a queued order or a rejection: duplicate check, stock check, stock
//! decrement, purchase mark and enqueue never interleave with other callers.

mod admission_gate;

#[cfg(test)]
mod admission_gate_test;

pub use admission_gate::*;
