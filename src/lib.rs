#![forbid(unsafe_code)]

//! `filegate` decides who may see indexed documents and serves stored files
//! through per-component strategies.
//!
//! - `store`: storage trait + SQLite implementation
//! - `search`: the all-courses search area and its access resolver
//! - `serving`: strategy registry, default and folder strategies, transmission
//! - `filters`: SQL-building user filters
//! - `events` / `tasks`: scheduled task edits and the event they raise
//! - `migrations`: schema bootstrap helpers

mod gate;

pub mod events;
pub mod filters;
pub mod migrations;
pub mod search;
pub mod serving;
pub mod store;
pub mod tasks;

pub use filegate_core::{Error, Result};
pub use gate::{FileGate, PluginFileRequest, UserFilterResult};
