pub mod breaker;
pub mod checkpoint;
pub mod errors;
pub mod quarantine;
pub mod report;
pub mod sync_job;
