//! Snippet migration service: job control over HTTP, the staged migration
//! engine and its source connectors.

pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
