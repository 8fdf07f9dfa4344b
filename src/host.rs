//! Host access: read-only inspection and mutating provisioning primitives.
//!
//! The split is the contract that makes idempotency reasoning tractable:
//! probes, preconditions and idempotency checks only ever receive an
//! `&dyn Inspect`, so they cannot mutate the host. Step actions receive an
//! `&dyn Provision`, which adds the side-effecting collaborators
//! (package install, download, service manager, file writes).
//!
//! `SystemHost` is the real implementation. Every command it spawns goes
//! through `run_tracked`, which isolates the child in its own process group
//! and registers it with the global `ChildRegistry`.

use crate::error::{ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

/// Read-only queries against the host.
pub trait Inspect {
    /// Whether an executable with this name is on `PATH`.
    fn command_exists(&self, name: &str) -> bool;

    /// Run a read-only command; `Some(stdout)` on exit status 0.
    fn query(&self, program: &str, args: &[&str]) -> Option<String>;

    fn read_to_string(&self, path: &Path) -> Option<String>;

    fn read_link(&self, path: &Path) -> Option<PathBuf>;

    fn exists(&self, path: &Path) -> bool;

    /// Whether a service is currently active in the service manager.
    fn is_active(&self, service: &str) -> bool;
}

/// Side-effecting collaborators. Only step actions receive this.
pub trait Provision: Inspect {
    /// Install a package by name or local package path.
    fn install(&self, package: &str) -> Result<()>;

    /// Download `url` to `dest`.
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;

    fn enable(&self, service: &str) -> Result<()>;

    fn start(&self, service: &str) -> Result<()>;

    /// Make the service manager pick up new or changed unit files.
    fn reload_units(&self) -> Result<()>;

    /// Run a command; non-zero exit is an error.
    fn run(&self, invocation: &Invocation) -> Result<String>;

    /// Write `contents` to `path` (creating parent directories) with `mode`.
    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    /// Point `link` at `target`, replacing whatever was there.
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
}

/// A command line plus environment.
///
/// Secrets (enrollment and auth keys) travel in `env`, never in `args`, and
/// env values are redacted from `Debug` output so they never reach the log.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg1 arg2`, for error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .finish()
    }
}

/// The real host: shells out to the package manager, `curl` and `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemHost {
    /// Command prefix used to install a package, e.g. `apt-get install -y`
    package_install: Vec<String>,
}

impl SystemHost {
    pub fn new(package_install: Vec<String>) -> Self {
        Self { package_install }
    }

    fn systemctl(&self, args: &[&str]) -> Result<String> {
        self.run(&Invocation::new("systemctl").args(args.iter().copied()))
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new(vec![
            "apt-get".to_string(),
            "install".to_string(),
            "-y".to_string(),
        ])
    }
}

/// Spawn a command in its own process group, tracked for signal cleanup.
fn run_tracked(cmd: &mut Command) -> std::io::Result<Output> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .spawn()?;
    let pid = child.id();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }

    let output = child.wait_with_output();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }

    output
}

impl Inspect for SystemHost {
    fn command_exists(&self, name: &str) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| {
            std::fs::metadata(dir.join(name))
                .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
    }

    fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        let output = run_tracked(Command::new(program).args(args)).ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            debug!(program, ?args, code = ?output.status.code(), "query exited non-zero");
            None
        }
    }

    fn read_to_string(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }

    fn read_link(&self, path: &Path) -> Option<PathBuf> {
        std::fs::read_link(path).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_active(&self, service: &str) -> bool {
        run_tracked(Command::new("systemctl").args(["is-active", "--quiet", service]))
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

impl Provision for SystemHost {
    fn install(&self, package: &str) -> Result<()> {
        let (program, prefix) = self
            .package_install
            .split_first()
            .ok_or_else(|| ProvisionError::invalid_input("empty package install command"))?;
        let invocation = Invocation::new(program.as_str())
            .args(prefix.iter().cloned())
            .arg(package)
            .env("DEBIAN_FRONTEND", "noninteractive");
        self.run(&invocation).map(|_| ())
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let invocation = Invocation::new("curl")
            .args(["-fsSL", "-o"])
            .arg(dest.display().to_string())
            .arg(url);
        self.run(&invocation).map(|_| ())
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.systemctl(&["enable", service]).map(|_| ())
    }

    fn start(&self, service: &str) -> Result<()> {
        self.systemctl(&["start", service]).map(|_| ())
    }

    fn reload_units(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).map(|_| ())
    }

    fn run(&self, invocation: &Invocation) -> Result<String> {
        info!(command = %invocation.command_line(), "running");
        debug!(?invocation);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let output = run_tracked(&mut cmd)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(ProvisionError::Command {
                command: invocation.command_line(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        debug!(path = %path.display(), mode = %format!("{:o}", mode), "wrote file");
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        if std::fs::symlink_metadata(link).is_ok() {
            std::fs::remove_file(link)?;
        }
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_debug_redacts_env_values() {
        let invocation = Invocation::new("agent-installer")
            .arg("--install")
            .env("AGENT_ENROLL_KEY", "s3cr3t");
        let rendered = format!("{:?}", invocation);
        assert!(rendered.contains("AGENT_ENROLL_KEY"));
        assert!(!rendered.contains("s3cr3t"));
        assert_eq!(invocation.command_line(), "agent-installer --install");
    }

    #[test]
    fn test_command_exists() {
        let host = SystemHost::default();
        assert!(host.command_exists("sh"));
        assert!(!host.command_exists("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_query_success_and_failure() {
        let host = SystemHost::default();
        assert_eq!(host.query("echo", &["hello"]), Some("hello".to_string()));
        assert_eq!(host.query("false", &[]), None);
        assert_eq!(host.query("this_binary_definitely_does_not_exist_12345", &[]), None);
    }

    #[test]
    fn test_run_reports_exit_code_and_stderr() {
        let host = SystemHost::default();
        let err = host
            .run(&Invocation::new("sh").args(["-c", "echo nope >&2; exit 3"]))
            .expect_err("should fail");
        match err {
            ProvisionError::Command { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_passes_env() {
        let host = SystemHost::default();
        let out = host
            .run(&Invocation::new("sh").args(["-c", "printf %s \"$KEY\""]).env("KEY", "v"))
            .expect("run");
        assert_eq!(out, "v");
    }

    #[test]
    fn test_write_file_and_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = SystemHost::default();
        let file = dir.path().join("nested/etc/timezone");
        host.write_file(&file, "UTC\n", 0o644).expect("write");
        assert_eq!(host.read_to_string(&file).as_deref(), Some("UTC\n"));

        let link = dir.path().join("localtime");
        host.symlink(&file, &link).expect("symlink");
        host.symlink(&file, &link).expect("symlink replaces existing");
        assert_eq!(host.read_link(&link), Some(file));
    }
}
