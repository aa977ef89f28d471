//! kiln-lib: asset graph and incremental build engine for kiln
//!
//! This crate provides:
//! - `asset`: the asset contract, file fetching and resolved parents
//! - `engine`: the builder that resolves targets and persists their files
//! - `assets`: the installer's concrete asset graph and targets
//! - `install_lock`: mutual exclusion on an install directory

pub mod asset;
pub mod assets;
pub mod consts;
pub mod engine;
pub mod install_lock;
pub mod util;
