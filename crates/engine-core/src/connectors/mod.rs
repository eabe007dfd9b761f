pub mod secrets;
pub mod source;
pub mod staging;
pub mod warehouse;
