// LogTrawl - platform/mod.rs
//
// Platform abstraction layer: config file location and filesystem helpers.
// Dependencies: util, directories crate.
// Must NOT depend on: core, app.

pub mod config;
pub mod fs;
