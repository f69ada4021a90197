// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable naming the pipeline file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "DAGFLOW_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "Dagflow.toml";

/// Deserialize a pipeline from TOML text. No semantic checks.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(contents)?)
}

/// Read and deserialize the pipeline file at `path`.
///
/// Like [`parse_str`], this does **not** validate the task graph; use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let raw = parse_str(&fs::read_to_string(path)?)?;
    debug!(path = ?path, tasks = raw.task.len(), "parsed config file");
    Ok(raw)
}

/// Read a pipeline file and turn it into a validated [`ConfigFile`].
///
/// Rejects unknown `after` / `reads` / `end` references, malformed join and
/// branch annotations, cycles and a zero `max_parallel`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// `$DAGFLOW_CONFIG` if set, else `Dagflow.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Directory holding the config file; used as the root for file result
/// storage. A bare file name resolves to the current directory.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_pipeline() {
        let raw = parse_str("[task.hello]\ncmd = \"echo hi\"\n").unwrap();
        assert_eq!(raw.task["hello"].cmd, "echo hi");
        assert_eq!(raw.config.max_parallel, 4);
    }

    #[test]
    fn bare_file_name_is_rooted_in_cwd() {
        let root = config_root_dir(Path::new("Dagflow.toml"));
        assert_eq!(root, std::env::current_dir().unwrap());
        assert_eq!(
            config_root_dir(Path::new("/srv/pipelines/Dagflow.toml")),
            PathBuf::from("/srv/pipelines")
        );
    }
}
