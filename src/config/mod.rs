// src/config/mod.rs

//! Configuration loading and validation for dagflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references, task annotations and acyclicity (`validate.rs`).
//! - Compile a validated config into a DAG of shell tasks (`compile.rs`).

pub mod compile;
pub mod loader;
pub mod model;
pub mod validate;

pub use compile::{build_dag, run_config};
pub use loader::{
    CONFIG_ENV_VAR, config_root_dir, default_config_path, load_and_validate, load_from_path,
    parse_str,
};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig, TaskKindConfig};
