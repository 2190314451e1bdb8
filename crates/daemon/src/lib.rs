// vibegraph-sync library entry point.

pub mod config;
pub mod control;
pub mod feed;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod sync;
