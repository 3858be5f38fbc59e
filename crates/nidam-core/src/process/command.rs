//! One-shot external commands.

use crate::error::{NidamError, Result};
use crate::platform;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info};

/// Description of a command to run.
///
/// `python` and `jileml` are rewritten to the environment interpreter when a
/// `venv` is set, so commands read the same inside and outside environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Start from the parent environment instead of an empty one.
    pub copy_env: bool,
    pub venv: Option<PathBuf>,
    /// Capture output instead of inheriting the terminal.
    pub silent: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            copy_env: true,
            venv: None,
            silent: true,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn copy_env(mut self, copy: bool) -> Self {
        self.copy_env = copy;
        self
    }

    pub fn venv(mut self, venv: impl Into<PathBuf>) -> Self {
        self.venv = Some(venv.into());
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// The executable and full argument list after interpreter rewriting.
    pub fn resolve(&self) -> (PathBuf, Vec<OsString>) {
        let python = match &self.venv {
            Some(venv) => platform::venv_python(venv),
            None => PathBuf::from(platform::host_python()),
        };
        match self.program.as_str() {
            "python" => (python, self.args.clone()),
            "jileml" => {
                let mut args: Vec<OsString> = vec!["-m".into(), "jileml".into()];
                args.extend(self.args.iter().cloned());
                (python, args)
            }
            _ => (PathBuf::from(&self.program), self.args.clone()),
        }
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let (program, args) = self.resolve();
        std::iter::once(program.into_os_string())
            .chain(args)
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A tokio command configured from this spec. Stdio is left to the caller.
    pub fn to_command(&self) -> Command {
        let (program, args) = self.resolve();
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if !self.copy_env {
            cmd.env_clear();
        }
        cmd.envs(&self.env);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn log(&self) {
        let line = self.display();
        if self.silent {
            debug!("$ {}", line);
            return;
        }
        if let Some(cwd) = &self.cwd {
            info!("$ cd {}", cwd.display());
        }
        for (k, v) in &self.env {
            info!("$ export {}={}", k, v);
        }
        if let Some(venv) = &self.venv {
            info!("$ source {}", platform::venv_bin_dir(venv).join("activate").display());
        }
        info!("$ {}", line);
    }
}

/// Run `spec` to completion.
///
/// A non-zero exit is a [`NidamError::CommandFailed`] carrying the captured
/// stderr (empty when output was inherited).
pub async fn run_command(spec: &CommandSpec) -> Result<Output> {
    spec.log();
    let mut cmd = spec.to_command();
    if spec.silent {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| NidamError::Other(format!("Failed to run {}: {}", spec.program, e)))?;

    if !output.status.success() {
        return Err(NidamError::command_failed(
            spec.program.clone(),
            output.status,
            &output.stderr,
        ));
    }
    Ok(output)
}

/// Run `spec` and return its trimmed stdout.
pub async fn capture_stdout(spec: &CommandSpec) -> Result<String> {
    let spec = spec.clone().silent(true);
    let output = run_command(&spec).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Path of the interpreter a `python` command would use with `venv`.
pub fn python_for(venv: Option<&Path>) -> PathBuf {
    match venv {
        Some(v) => platform::venv_python(v),
        None => PathBuf::from(platform::host_python()),
    }
}
