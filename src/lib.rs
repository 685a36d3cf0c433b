pub mod errors;
pub mod models;
pub mod network;
pub mod providers;
