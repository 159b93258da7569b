//! Configuration loading and music repository resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the repository path.
pub const REPO_ENV_VAR: &str = "MUSIC_COMMANDER_REPO";

/// Loaded configuration for a music-commander invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the git-annex music repository root.
    pub music_repo: PathBuf,
    /// Default for the FLAC channel-mask compatibility warning.
    pub flac_multichannel_check: bool,
}

/// On-disk TOML configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub music_repo: Option<PathBuf>,
    #[serde(default)]
    pub flac_multichannel_check: bool,
}

/// Default configuration file path: `~/.config/music-commander/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("music-commander").join("config.toml"))
}

/// Read and parse a TOML config file.
pub fn read_config_file(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Resolve the final configuration.
///
/// Repository resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `MUSIC_COMMANDER_REPO` environment variable
/// 3. TOML config file
pub fn load_config(cli_repo: Option<&Path>, config_file: Option<&Path>) -> Result<Config> {
    let file_config = match config_file {
        Some(path) => read_config_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => read_config_file(&path)?,
            _ => TomlConfig::default(),
        },
    };

    let music_repo = if let Some(path) = cli_repo {
        path.to_path_buf()
    } else if let Ok(path) = std::env::var(REPO_ENV_VAR) {
        PathBuf::from(path)
    } else if let Some(path) = file_config.music_repo.clone() {
        path
    } else {
        return Err(Error::Config(format!(
            "no music repository configured (use --repo, {REPO_ENV_VAR}, or the config file)"
        )));
    };

    Ok(Config {
        music_repo,
        flac_multichannel_check: file_config.flac_multichannel_check,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cli_argument_wins_over_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "music_repo = \"/from/file\"\n").unwrap();

        let config =
            load_config(Some(Path::new("/from/cli")), Some(&config_path)).unwrap();
        assert_eq!(config.music_repo, PathBuf::from("/from/cli"));
    }

    #[test]
    fn config_file_supplies_repo_and_flags() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "music_repo = \"/music\"\nflac_multichannel_check = true\n",
        )
        .unwrap();

        let config = load_config(None, Some(&config_path)).unwrap();
        assert_eq!(config.music_repo, PathBuf::from("/music"));
        assert!(config.flac_multichannel_check);
    }

    #[test]
    fn missing_repo_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "").unwrap();

        let result = load_config(None, Some(&config_path));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "music_repo = [not toml").unwrap();

        let result = load_config(None, Some(&config_path));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
