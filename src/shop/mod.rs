//! Shop read and write paths on top of the cache client.

mod shop_service;


pub use shop_service::*;
