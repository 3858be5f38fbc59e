//! Platform-specific path utilities.

use std::path::{Path, PathBuf};

/// Directory holding executables inside a virtual environment.
///
/// # Platform Behavior
/// - **Linux/macOS**: `{venv}/bin`
/// - **Windows**: `{venv}/Scripts`
pub fn venv_bin_dir(venv: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        venv.join("Scripts")
    }
    #[cfg(not(windows))]
    {
        venv.join("bin")
    }
}

/// Get the path to the Python executable within a virtual environment.
///
/// # Platform Behavior
/// - **Linux/macOS**: `{venv}/bin/python`
/// - **Windows**: `{venv}/Scripts/python.exe`
pub fn venv_python(venv: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        venv_bin_dir(venv).join("python.exe")
    }
    #[cfg(not(windows))]
    {
        venv_bin_dir(venv).join("python")
    }
}

/// Interpreter used for commands that run outside any environment.
///
/// # Platform Behavior
/// - **Linux/macOS**: `python3` when present, else `python`
/// - **Windows**: `python`
pub fn host_python() -> &'static str {
    if cfg!(unix) && command_exists("python3") {
        "python3"
    } else {
        "python"
    }
}

/// Check if a command exists in the system PATH.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `which` command
/// - **Windows**: Uses `where` command
pub fn command_exists(cmd: &str) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("which")
            .arg(cmd)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        std::process::Command::new("where")
            .arg(cmd)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = cmd;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venv_python_path() {
        let venv = PathBuf::from("/home/user/.nidam/venv/abc");
        let python = venv_python(&venv);

        #[cfg(unix)]
        assert_eq!(python, PathBuf::from("/home/user/.nidam/venv/abc/bin/python"));

        #[cfg(windows)]
        assert!(python.ends_with("Scripts/python.exe"));
    }

    #[test]
    fn test_command_exists_for_missing_command() {
        assert!(!command_exists("nidam-definitely-not-a-real-command"));
    }
}
