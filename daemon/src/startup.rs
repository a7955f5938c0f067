/// Login startup registration, driven by the `autoStartOnLogin` config field.
///
/// - Windows: a `CloudMount` value under `HKCU\Software\Microsoft\Windows\CurrentVersion\Run`.
/// - Linux: an XDG autostart entry at `~/.config/autostart/cloudmount.desktop`.
/// - Elsewhere both operations succeed as no-ops.
///
/// Both operations are idempotent, so [`sync`] can run on every start and on
/// every config reload.
use anyhow::{Context, Result};

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "CloudMount";

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn register(command_line: &str) -> Result<()> {
        let key = wide(RUN_KEY);
        let name = wide(VALUE_NAME);
        let data = wide(command_line);
        let bytes: Vec<u8> = data.iter().flat_map(|unit| unit.to_le_bytes()).collect();

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {err:?}");
        }

        let err = unsafe {
            RegSetValueExW(hkey, PCWSTR::from_raw(name.as_ptr()), 0, REG_SZ, Some(&bytes))
        };
        unsafe {
            let _ = RegCloseKey(hkey);
        }
        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {err:?}");
        }
        Ok(())
    }

    pub fn unregister() -> Result<()> {
        let key = wide(RUN_KEY);
        let name = wide(VALUE_NAME);

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key.as_ptr()),
                0,
                KEY_SET_VALUE,
                &mut hkey,
            )
        };
        if err != ERROR_SUCCESS {
            return Ok(());
        }

        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(name.as_ptr())) };
        unsafe {
            let _ = RegCloseKey(hkey);
        }
        if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
            bail!("RegDeleteValueW failed: {err:?}");
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use anyhow::{Context, Result};
    use std::path::{Path, PathBuf};

    const ENTRY_FILE_NAME: &str = "cloudmount.desktop";

    fn entry_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine the user config directory")?;
        Ok(base.join("autostart").join(ENTRY_FILE_NAME))
    }

    pub fn desktop_entry(command_line: &str) -> String {
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=CloudMount\n\
             Comment=Keeps the network drive mounted\n\
             Exec={command_line}\n\
             X-GNOME-Autostart-enabled=true\n"
        )
    }

    pub fn register(command_line: &str) -> Result<()> {
        write_entry(&entry_path()?, command_line)
    }

    pub fn unregister() -> Result<()> {
        remove_entry(&entry_path()?)
    }

    pub fn write_entry(path: &Path, command_line: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(path, desktop_entry(command_line))
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn remove_entry(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
mod imp {
    use anyhow::Result;

    pub fn register(_command_line: &str) -> Result<()> {
        Ok(())
    }

    pub fn unregister() -> Result<()> {
        Ok(())
    }
}

/// Registers the running daemon binary to start at user login.
pub fn register_startup() -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate daemon executable")?;
    let command_line = format!("\"{}\"", exe.display());
    imp::register(&command_line)?;
    tracing::info!("Registered for login startup: {command_line}");
    Ok(())
}

/// Removes the login startup registration, if any.
pub fn unregister_startup() -> Result<()> {
    imp::unregister()?;
    tracing::info!("Removed login startup registration");
    Ok(())
}

/// Brings the registration in line with `auto_start_on_login`.
pub fn sync(auto_start_on_login: bool) -> Result<()> {
    if auto_start_on_login {
        register_startup()
    } else {
        unregister_startup()
    }
}

#[cfg(test)]
#[cfg(target_os = "linux")]
mod tests {
    use super::imp::*;

    #[test]
    fn desktop_entry_runs_the_given_command() {
        let entry = desktop_entry("\"/opt/cloudmount/cloudmount-daemon\"");
        assert!(entry.starts_with("[Desktop Entry]\n"));
        assert!(entry.contains("Exec=\"/opt/cloudmount/cloudmount-daemon\"\n"));
    }

    #[test]
    fn write_then_remove_entry_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autostart").join("cloudmount.desktop");

        write_entry(&path, "cloudmount-daemon").unwrap();
        write_entry(&path, "cloudmount-daemon").unwrap();
        assert!(path.exists());

        remove_entry(&path).unwrap();
        remove_entry(&path).unwrap();
        assert!(!path.exists());
    }
}
