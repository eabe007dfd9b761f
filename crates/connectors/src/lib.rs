pub mod error;
pub mod http;
pub mod secrets;
pub mod staging;
pub mod warehouse;
