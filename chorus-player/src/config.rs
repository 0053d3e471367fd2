//! Configuration loading and data folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Runtime configuration for the playback core
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Data folder holding queue backups and statistics
    pub data_dir: PathBuf,

    /// Path to the mixer sidecar binary
    pub mixer_binary: PathBuf,

    /// Extra arguments passed to the sidecar
    pub mixer_args: Vec<String>,
}

impl PlayerConfig {
    /// Resolve configuration following the priority order:
    /// 1. Command-line argument (highest priority)
    /// 2. Environment variable
    /// 3. OS-dependent compiled default (fallback)
    pub fn resolve(
        data_dir_arg: Option<&str>,
        mixer_binary_arg: Option<&str>,
    ) -> Result<PlayerConfig> {
        let data_dir = resolve_data_dir(data_dir_arg)?;
        std::fs::create_dir_all(&data_dir)?;

        let mixer_binary = match mixer_binary_arg {
            Some(path) => PathBuf::from(path),
            None => match std::env::var("CHORUS_MIXER_BIN") {
                Ok(path) => PathBuf::from(path),
                // Fall back to resolving `chorus-mixer` from PATH
                Err(_) => PathBuf::from("chorus-mixer"),
            },
        };

        Ok(PlayerConfig {
            data_dir,
            mixer_binary,
            mixer_args: Vec::new(),
        })
    }

    /// Queue backup file inside the data folder
    pub fn queue_backup_path(&self) -> PathBuf {
        self.data_dir.join("queues.json")
    }

    /// Listening statistics file inside the data folder
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }
}

fn resolve_data_dir(cli_arg: Option<&str>) -> Result<PathBuf> {
    // Priority 1: command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var("CHORUS_DATA_DIR") {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: OS-dependent default
    if cfg!(target_os = "windows") {
        std::env::var("LOCALAPPDATA")
            .map(|d| PathBuf::from(d).join("chorus"))
            .map_err(|_| Error::Config("LOCALAPPDATA not set".to_string()))
    } else {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".local").join("share").join("chorus"))
            .map_err(|_| Error::Config("HOME not set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_arg_wins() {
        let cfg = PlayerConfig::resolve(Some("/tmp/chorus-test-data"), Some("/opt/mixer")).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/chorus-test-data"));
        assert_eq!(cfg.mixer_binary, PathBuf::from("/opt/mixer"));
    }

    #[test]
    fn test_derived_paths() {
        let cfg = PlayerConfig {
            data_dir: PathBuf::from("/data"),
            mixer_binary: PathBuf::from("chorus-mixer"),
            mixer_args: Vec::new(),
        };
        assert_eq!(cfg.queue_backup_path(), PathBuf::from("/data/queues.json"));
        assert_eq!(cfg.stats_path(), PathBuf::from("/data/stats.json"));
    }
}
