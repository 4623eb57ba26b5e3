// LogTrawl - core/mod.rs
//
// Discovery, matching and correlation engine.
// Dependencies: util, platform::fs.
// Must NOT depend on: app or the binary.

pub mod archive;
pub mod discovery;
pub mod export;
pub mod hooks;
pub mod model;
pub mod pattern;
pub mod scanner;
pub mod store;
pub mod template;
pub mod timestamp;
