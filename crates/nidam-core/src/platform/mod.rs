//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here:
//! - `paths` - interpreter locations inside runtime environments
//! - `process` - interrupting and stopping child processes
//!
//! # Supported Platforms
//!
//! - **Linux**: Full support
//! - **Windows**: Full support
//! - **macOS**: Detection and environments; model labels rarely list it

pub mod paths;
pub mod process;

pub use paths::{command_exists, host_python, venv_bin_dir, venv_python};
pub use process::interrupt_child;

/// Returns the current platform name as used in model `platforms` labels.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

/// Returns true if the current platform is supported.
pub fn is_supported_platform() -> bool {
    cfg!(any(target_os = "linux", target_os = "windows", target_os = "macos"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_platform() {
        let platform = current_platform();
        assert!(["linux", "windows", "macos", "unknown"].contains(&platform));
    }

    #[test]
    fn test_is_supported_platform() {
        #[cfg(any(target_os = "linux", target_os = "windows", target_os = "macos"))]
        assert!(is_supported_platform());
    }
}
