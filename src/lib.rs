//! SwitchBlade - Switch homebrew package and mod manager core
//!
//! Streams firmware packages, cheat sets and title mods onto an SD card,
//! and applies, removes and verifies mod folders against the live install.

pub mod archive;
pub mod config;
pub mod extract;
pub mod hash;
pub mod mods;
pub mod paths;
pub mod payload;
pub mod progress;
pub mod titles;
