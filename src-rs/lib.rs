pub mod arch;
pub mod config;
pub mod error;
pub mod hash;
pub mod helpers;
pub mod orchestrator;
pub mod result;
pub mod uploads;
pub mod verifier;
pub mod workspace;

#[path = "index/lib.rs"]
pub mod index;
#[path = "tools/lib.rs"]
pub mod tools;
#[path = "task/lib.rs"]
pub mod task;
#[path = "api/lib.rs"]
pub mod api;

#[cfg(test)]
mod testing;

pub use arch::Architecture;
pub use config::ServiceConfig;
pub use error::FailureReason;
pub use hash::Fingerprint;
pub use orchestrator::Orchestrator;
pub use result::TaskResult;
