//! Time-ordered 64-bit identifiers per business sequence.

mod id_generator;


pub use id_generator::*;
