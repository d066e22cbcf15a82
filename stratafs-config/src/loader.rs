//! Configuration loading.
//!
//! Evaluation order:
//! 1. `$STRATAFS_CONFIG_PATH` (TOML or JSON file),
//! 2. `$STRATAFS_CONFIG_JSON` (inline JSON),
//! 3. a default file (`stratafs.toml`, `stratafs.json`, or the same under
//!    `config/`),
//! 4. built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::info;

use crate::models::Config;

/// Source that produced the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

const DEFAULT_FILES: &[&str] = &[
    "stratafs.toml",
    "stratafs.json",
    "config/stratafs.toml",
    "config/stratafs.json",
];

pub fn load_from_env() -> anyhow::Result<(Config, ConfigSource)> {
    if let Ok(path_str) = env::var("STRATAFS_CONFIG_PATH")
        && !path_str.trim().is_empty()
    {
        let path = PathBuf::from(path_str);
        let config = load_from_file(&path)?;
        info!("configuration loaded from {}", path.display());
        return Ok((config, ConfigSource::EnvPath(path)));
    }

    if let Ok(raw) = env::var("STRATAFS_CONFIG_JSON")
        && !raw.trim().is_empty()
    {
        let config =
            parse_json(&raw).context("failed to parse STRATAFS_CONFIG_JSON")?;
        return Ok((config, ConfigSource::EnvInline));
    }

    if let Some(path) = find_default_file() {
        let config = load_from_file(&path)?;
        return Ok((config, ConfigSource::File(path)));
    }

    Ok((Config::default(), ConfigSource::Default))
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents)
            .with_context(|| format!("invalid config {}", path.display())),
        Some("toml") | Some("tml") => toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

/// Try TOML first, then JSON for convenience.
pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Config> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

fn parse_json(raw: &str) -> anyhow::Result<Config> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
}

fn find_default_file() -> Option<PathBuf> {
    DEFAULT_FILES
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn toml_file_round_trips() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[watch]\ndebounce_ms = 75").unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.watch.debounce_ms, 75);
    }

    #[test]
    fn json_file_round_trips() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(file, "{{\"catalog\": {{\"owner_uid\": 42}}}}").unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.catalog.owner_uid, 42);
    }

    #[test]
    fn extensionless_files_try_both_formats() {
        let config = parse_from_str("[exec]\nuser = \"svc\"", "inline").unwrap();
        assert_eq!(config.exec.user, "svc");

        let config = parse_from_str("{\"exec\": {\"user\": \"svc\"}}", "inline").unwrap();
        assert_eq!(config.exec.user, "svc");

        assert!(parse_from_str("definitely not config", "inline").is_err());
    }

    #[test]
    fn missing_file_is_a_context_error() {
        let err = load_from_file(Path::new("/no/such/stratafs.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
