//! Environment construction steps.

use crate::config::InstallConfig;
use crate::error::Result;
use crate::platform;
use crate::process::{run_command, CommandSpec};
use crate::venv::EnvVars;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// The three external steps of building an environment.
///
/// [`EnvironmentCache`](super::EnvironmentCache) calls them in order and owns
/// everything else: the requirements file, the sentinel and cleanup.
#[async_trait]
pub trait EnvironmentBuilder: Send + Sync {
    /// Create an isolated interpreter of `python_version` at `venv`.
    async fn create_interpreter(&self, venv: &Path, python_version: &str) -> Result<()>;

    /// Install the base serving package.
    async fn install_base(&self, venv: &Path, envs: &EnvVars) -> Result<()>;

    /// Install the packages listed in `requirements`.
    async fn install_requirements(&self, venv: &Path, requirements: &Path, envs: &EnvVars)
        -> Result<()>;
}

/// Builds environments with `uv`, run through the host interpreter.
#[derive(Debug, Clone, Default)]
pub struct UvBuilder {
    /// Show tool output instead of capturing it.
    pub verbose: bool,
}

impl UvBuilder {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn uv(&self) -> CommandSpec {
        CommandSpec::new("python")
            .args(["-m", "uv"])
            .silent(!self.verbose)
    }

    fn pip_install(&self, venv: &Path, envs: &EnvVars) -> CommandSpec {
        self.uv()
            .args(["pip", "install", "-p"])
            .arg(platform::venv_python(venv))
            .envs(envs.iter())
    }
}

#[async_trait]
impl EnvironmentBuilder for UvBuilder {
    async fn create_interpreter(&self, venv: &Path, python_version: &str) -> Result<()> {
        debug!("Creating python {} environment at {}", python_version, venv.display());
        let spec = self.uv().arg("venv").arg(venv).args(["-p", python_version]);
        run_command(&spec).await?;
        Ok(())
    }

    async fn install_base(&self, venv: &Path, envs: &EnvVars) -> Result<()> {
        let spec = self.pip_install(venv, envs).arg(InstallConfig::BASE_PACKAGE);
        run_command(&spec).await?;
        Ok(())
    }

    async fn install_requirements(
        &self,
        venv: &Path,
        requirements: &Path,
        envs: &EnvVars,
    ) -> Result<()> {
        let spec = self.pip_install(venv, envs).arg("-r").arg(requirements);
        run_command(&spec).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_install_targets_venv_python() {
        let builder = UvBuilder::new(false);
        let envs: EnvVars = [("HF_TOKEN", "abc")].into_iter().collect();
        let spec = builder
            .pip_install(Path::new("/v/abc"), &envs)
            .arg(InstallConfig::BASE_PACKAGE);

        let args: Vec<String> = spec
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let python = platform::venv_python(Path::new("/v/abc"));
        assert_eq!(
            args,
            vec![
                "-m".to_string(),
                "uv".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "-p".to_string(),
                python.to_string_lossy().into_owned(),
                "jileml".to_string(),
            ]
        );
        assert_eq!(spec.env.get("HF_TOKEN").map(String::as_str), Some("abc"));
        assert!(spec.silent);
    }
}
