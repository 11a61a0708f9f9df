//! statepop - per-state population snapshots from an ArcGIS counties layer

pub mod api;
pub mod config;
pub mod pipeline;
