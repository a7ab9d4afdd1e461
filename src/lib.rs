// src/lib.rs

//! Site watcher library: watches registered pages for content changes,
//! records a snapshot history and captures rendered documents on change.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
