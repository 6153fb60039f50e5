//! Configuration loading

use anyhow::{Context, Result};

use crate::Config;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "IDLINK_CONFIG_PATH";

/// Load and validate configuration
///
/// Config file search order:
/// 1. `explicit_path` (the `--config` flag)
/// 2. `IDLINK_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. Fall back to defaults and environment variables only
///
/// Runs before logging is set up, so progress goes to stderr.
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let config_path = explicit_path
        .map(ToString::to_string)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .or_else(|| {
            let cwd = "config.yaml";
            std::path::Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = if let Some(path) = config_path {
        if !std::path::Path::new(&path).exists() {
            anyhow::bail!("Config file {path} does not exist");
        }
        eprintln!("Loading config from {path}");
        Config::from_file(&path).with_context(|| format!("Failed to load {path}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().context("Failed to load config from environment")?
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        anyhow::bail!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config(Some("/nonexistent/idlink.yaml")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  http_port: 0\n").unwrap();

        let err = load_config(path.to_str()).unwrap_err();
        assert!(err.to_string().contains("server.http_port"));
    }
}
