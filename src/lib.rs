// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

pub mod cancel;
pub mod config;
pub mod dump;
pub mod error;
pub mod loader;
pub mod parser;
pub mod planner;
pub mod preflight;
pub mod progress;
pub mod spool;
pub mod target;
pub mod uploader;
