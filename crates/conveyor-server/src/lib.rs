//! # Conveyor server
//!
//! The job coordination plane (spec §4.5, §4.6): an HTTP frontend in front
//! of a backend that submits jobs to the broker and persists/reports
//! completions against the job store.

mod auth;
mod backend;
mod config;
mod http;

pub use backend::Backend;
pub use config::ServerConfig;
pub use http::router;
