// vibegraph-common: shared graph model, merge policy and sync types.

pub mod graph;
pub mod merge;
pub mod sync;
pub mod types;
