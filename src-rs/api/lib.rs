pub use crate::orchestrator::Orchestrator;

pub mod handlers;
pub mod server;

pub use handlers::ApiError;
pub use server::{router, RelibServer};
