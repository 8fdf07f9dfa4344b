//! In-memory host shared by the integration tests.
//!
//! `FakeHost` answers every `Inspect` query from its state and applies every
//! `Provision` call to that state, so a second orchestrator run observes the
//! effects of the first. Each mutating call is appended to a journal.

#![allow(dead_code)]

use hostprep::config::ProvisionConfig;
use hostprep::error::{ProvisionError, Result};
use hostprep::host::{Inspect, Invocation, Provision};
use hostprep::orchestrator::Orchestrator;
use hostprep::probe::EnvironmentProbe;
use hostprep::prompt::Prompter;
use hostprep::report::Report;
use hostprep::steps::default_plan;
use hostprep::ExecutionMode;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct HostState {
    pub commands: HashSet<String>,
    pub files: BTreeMap<PathBuf, String>,
    pub dirs: HashSet<PathBuf>,
    pub links: BTreeMap<PathBuf, PathBuf>,
    pub active: HashSet<String>,
    pub enabled: HashSet<String>,
    /// Services that refuse to become active on start
    pub broken: HashSet<String>,
    pub uname: Option<String>,
    pub timezone: Option<String>,
    /// `systemd-detect-virt --container` answer; `None` means bare metal
    pub container: Option<String>,
    pub overlay_connected: bool,
    /// Mutations in call order
    pub journal: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    pub state: RefCell<HostState>,
}

pub const AGENT_BINARY: &str = "/usr/local/bin/monitoring-agent";
pub const AGENT_CONFIG: &str = "/etc/monitoring-agent/agent.json";
pub const AGENT_MANIFEST: &str = "/etc/monitoring-agent/manifest.json";
pub const MEDIA_MANIFEST: &str = "/etc/hostprep/media.json";

impl FakeHost {
    /// Freshly booted amd64 machine with systemd, timezone UTC, nothing installed.
    pub fn fresh() -> Self {
        let host = Self::default();
        {
            let mut s = host.state.borrow_mut();
            for cmd in ["systemctl", "timedatectl", "systemd-detect-virt", "uname"] {
                s.commands.insert(cmd.to_string());
            }
            s.dirs.insert(PathBuf::from("/run/systemd/system"));
            for zone in ["UTC", "America/Chicago", "Europe/Berlin"] {
                s.files
                    .insert(Path::new("/usr/share/zoneinfo").join(zone), "TZif".to_string());
            }
            s.uname = Some("x86_64".to_string());
            s.timezone = Some("UTC".to_string());
        }
        host
    }

    /// Host on which every step is already at its target state.
    pub fn provisioned() -> Self {
        let host = Self::fresh();
        {
            let mut s = host.state.borrow_mut();
            s.timezone = Some("America/Chicago".to_string());
            s.files
                .insert(PathBuf::from(AGENT_MANIFEST), r#"{"version": "2.4.1"}"#.to_string());
            s.files.insert(
                PathBuf::from(AGENT_CONFIG),
                r#"{"client": "Acme", "site": "HQ"}"#.to_string(),
            );
            s.files.insert(
                PathBuf::from(MEDIA_MANIFEST),
                r#"{"version": "5.1.5.39242"}"#.to_string(),
            );
            s.commands.insert("tailscale".to_string());
            for service in ["monitoring-agent", "usblogmon", "tailscaled"] {
                s.active.insert(service.to_string());
                s.enabled.insert(service.to_string());
            }
        }
        host
    }

    pub fn with(self, f: impl FnOnce(&mut HostState)) -> Self {
        f(&mut self.state.borrow_mut());
        self
    }

    pub fn journal(&self) -> Vec<String> {
        self.state.borrow().journal.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.borrow().files.get(Path::new(path)).cloned()
    }

    fn record(&self, entry: String) {
        self.state.borrow_mut().journal.push(entry);
    }
}

impl Inspect for FakeHost {
    fn command_exists(&self, name: &str) -> bool {
        self.state.borrow().commands.contains(name)
    }

    fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        let s = self.state.borrow();
        if !s.commands.contains(program) {
            return None;
        }
        match (program, args.first().copied()) {
            ("uname", _) => s.uname.clone(),
            ("timedatectl", Some("show")) => s.timezone.clone(),
            ("systemd-detect-virt", _) => s.container.clone(),
            ("tailscale", Some("status")) => {
                s.overlay_connected.then(|| "100.64.0.1 node".to_string())
            }
            _ => None,
        }
    }

    fn read_to_string(&self, path: &Path) -> Option<String> {
        self.state.borrow().files.get(path).cloned()
    }

    fn read_link(&self, path: &Path) -> Option<PathBuf> {
        self.state.borrow().links.get(path).cloned()
    }

    fn exists(&self, path: &Path) -> bool {
        let s = self.state.borrow();
        s.files.contains_key(path) || s.dirs.contains(path) || s.links.contains_key(path)
    }

    fn is_active(&self, service: &str) -> bool {
        self.state.borrow().active.contains(service)
    }
}

impl Provision for FakeHost {
    fn install(&self, package: &str) -> Result<()> {
        self.record(format!("install {}", package));
        if package == "tailscale" {
            self.state.borrow_mut().commands.insert("tailscale".to_string());
        }
        Ok(())
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.record(format!("fetch {} -> {}", url, dest.display()));
        self.state
            .borrow_mut()
            .files
            .insert(dest.to_path_buf(), format!("downloaded from {}", url));
        Ok(())
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.record(format!("enable {}", service));
        self.state.borrow_mut().enabled.insert(service.to_string());
        Ok(())
    }

    fn start(&self, service: &str) -> Result<()> {
        self.record(format!("start {}", service));
        let mut s = self.state.borrow_mut();
        if !s.broken.contains(service) {
            s.active.insert(service.to_string());
        }
        Ok(())
    }

    fn reload_units(&self) -> Result<()> {
        self.record("daemon-reload".to_string());
        Ok(())
    }

    fn run(&self, invocation: &Invocation) -> Result<String> {
        self.record(format!("run {}", invocation.command_line()));
        let mut s = self.state.borrow_mut();
        match invocation.program.as_str() {
            "timedatectl" => {
                if let [verb, zone] = invocation.args.as_slice() {
                    if verb == "set-timezone" {
                        s.timezone = Some(zone.clone());
                    }
                }
            }
            "sh" => {
                let has_key = invocation
                    .env
                    .iter()
                    .any(|(k, v)| k == "OVERLAY_AUTH_KEY" && !v.is_empty());
                if !has_key {
                    return Err(ProvisionError::Command {
                        command: invocation.command_line(),
                        code: 1,
                        stderr: "missing auth key".to_string(),
                    });
                }
                s.overlay_connected = true;
            }
            AGENT_BINARY => {
                s.files.insert(
                    PathBuf::from(AGENT_CONFIG),
                    r#"{"client": "Acme", "site": "HQ"}"#.to_string(),
                );
            }
            _ => {}
        }
        Ok(String::new())
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        self.record(format!("write {} ({:o})", path.display(), mode));
        self.state
            .borrow_mut()
            .files
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.record(format!("symlink {} -> {}", link.display(), target.display()));
        self.state
            .borrow_mut()
            .links
            .insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }
}

/// One full orchestrator run with the default step plan and zero timeouts.
pub fn provision(host: &FakeHost, prompter: &dyn Prompter, mode: ExecutionMode) -> Report {
    let config = ProvisionConfig::default();
    let probe = EnvironmentProbe::from_config(host, &config);
    Orchestrator::new(host, prompter)
        .with_prompt_timeout(Duration::ZERO)
        .with_mode(mode)
        .run(&probe, default_plan(&config))
        .expect("default plan has unique steps")
}
