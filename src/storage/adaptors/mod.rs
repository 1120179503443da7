mod mem;
mod sled_adaptor;

pub use mem::*;
pub use sled_adaptor::*;
