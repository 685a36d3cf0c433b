pub mod base;
pub mod chat;
pub mod client;
pub mod factory;
pub mod responses;
pub mod stream;
pub mod utils;
