/// Canonical file paths for CloudMount data files.
///
/// Both files live in the per-user config directory
/// (`%APPDATA%\CloudMount` on Windows, `~/.config/cloudmount` on Linux):
///   - config.json  Written by the user, read by the daemon.
///   - status.toml  Written by the daemon, read by a front end.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[cfg(windows)]
const APP_DIR_NAME: &str = "CloudMount";
#[cfg(not(windows))]
const APP_DIR_NAME: &str = "cloudmount";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the CloudMount application data directory.
pub fn app_data_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(CONFIG_FILE_NAME))
}

/// The status file always sits next to whichever config file is in use.
pub fn status_file_path(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) => dir.join(STATUS_FILE_NAME),
        None => PathBuf::from(STATUS_FILE_NAME),
    }
}

/// Turns a user-supplied path into the absolute form file watchers report.
///
/// Symlinks and `..` are resolved when the file exists; otherwise the path is
/// only made absolute against the current directory.
pub fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(_) => std::path::absolute(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_path_has_correct_name() {
        if let Ok(path) = config_file_path() {
            assert_eq!(path.file_name().unwrap(), CONFIG_FILE_NAME);
            assert_eq!(path.parent().unwrap().file_name().unwrap(), APP_DIR_NAME);
        }
    }

    #[test]
    fn status_file_sits_next_to_config() {
        let config = Path::new("/tmp/custom/config.json");
        assert_eq!(
            status_file_path(config),
            Path::new("/tmp/custom").join(STATUS_FILE_NAME)
        );
    }

    #[test]
    fn relative_path_resolves_to_absolute() {
        let resolved = resolve(Path::new("config.json")).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved.file_name().unwrap(), "config.json");
        assert_eq!(
            resolved.parent().unwrap(),
            std::env::current_dir().unwrap().as_path()
        );
    }

    #[test]
    fn existing_path_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{}").unwrap();

        let roundabout = dir.path().join("sub").join("..").join(CONFIG_FILE_NAME);
        assert_eq!(
            resolve(&roundabout).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap().join(CONFIG_FILE_NAME)
        );
    }
}
