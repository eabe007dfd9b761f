pub mod context;
pub mod coordinator;
pub mod executor;
pub mod factory;

pub use context::{EntityPipeline, SyncContext};
pub use coordinator::SyncCoordinator;
pub use executor::{SyncExecutor, SyncRequest, run};
