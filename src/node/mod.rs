mod builder;
mod flash_sale;


pub use builder::*;
pub use flash_sale::*;
