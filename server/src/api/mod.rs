//! API server and routes

pub mod admin;
pub mod extractors;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
mod server;
pub mod types;

pub use admin::AdminGuard;
pub use server::{ApiContext, ApiServer, router};
