pub mod backend;
pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
pub mod executor;
pub mod logging;
pub mod probe;
pub mod query;
pub mod session;
