//! Command implementations for the CLI: configuration display and
//! validation. `serve` is handled directly in `main.rs`.

pub mod config;
