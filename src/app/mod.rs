// LogTrawl - app/mod.rs
//
// Application layer: pattern files on disk and search runs.
// Dependencies: core, platform, util.

pub mod pattern_mgr;
pub mod session;
