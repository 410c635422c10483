//! Import service: tracker entry writes and AI-assisted column mapping for
//! bank statement CSV imports.

pub mod config;
pub mod handlers;
pub mod mapping;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{build_router, AppState, Application};
