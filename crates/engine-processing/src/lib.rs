pub mod cb;
pub mod drift;
pub mod error;
pub mod extractor;
pub mod loader;
pub mod retry;
