pub mod chunk;
pub mod conversation;
pub mod error;
pub mod store;
pub mod utils;
