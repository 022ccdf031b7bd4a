//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_ENV_VAR: &str = "IDEAFORGE_ROOT";

/// Default HTTP listen port for the workshop coordinator
pub const DEFAULT_PORT: u16 = 5740;

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "ideaforge.db";

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `IDEAFORGE_ROOT` environment variable
/// 3. TOML config file (`ideaforge/config.toml` in the platform config dir)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Ensure the root folder exists and return the database path inside it
pub fn prepare_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)
        .map_err(|e| Error::Config(format!("cannot create root folder {:?}: {}", root, e)))?;
    Ok(root.join(DATABASE_FILE))
}

/// Locate the platform config file, if any
fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("ideaforge").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/ideaforge/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ideaforge"))
        .unwrap_or_else(|| PathBuf::from("./ideaforge_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_arg_wins() {
        let root = resolve_root_folder(Some("/tmp/forge-test"));
        assert_eq!(root, PathBuf::from("/tmp/forge-test"));
    }

    #[test]
    fn test_prepare_root_folder_returns_db_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = prepare_root_folder(dir.path()).unwrap();
        assert_eq!(db.file_name().unwrap(), DATABASE_FILE);
        assert!(dir.path().exists());
    }
}
