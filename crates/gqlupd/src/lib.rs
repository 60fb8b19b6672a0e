//! gqlupd: HTTP front end for the gqlup multipart engine.
//!
//! Mounts [`gqlup_multipart::process_request`] behind an axum route and
//! answers each upload with a JSON report of the operations document and
//! every file it received.

pub mod config;
pub mod routes;

pub use config::ServerConfig;
pub use routes::build_router;
