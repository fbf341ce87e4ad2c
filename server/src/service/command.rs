//! Remote command construction for the jail tool
//!
//! All user-supplied values pass through [`shell_quote`]. The resulting line
//! is POSIX `sh` syntax and is later wrapped by [`elevate`] so it runs as
//! root through `sudo -S`.
//!
//! A jail name or path containing a literal newline is not defended against:
//! the tool itself cannot address such a jail.

use std::fmt;

use crate::config::Config;
use crate::domain::action::{
    ActionRequest, BindMount, CreateSpec, GpuPassthrough, LifecycleAction, NetworkMode,
};
use crate::error::{Error, Result};

/// Flags appended to every non-custom create
const SECURITY_FLAGS: &str = "--system-call-filter='add_key keyctl bpf' --resolv-conf=bind-host";

/// Sets the erase key so backspace behaves in browser terminals
const STTY_ERASE: &str = "stty erase '^?'";

/// Quote a value as a single `sh` word.
///
/// Embedded single quotes close the quoted string, emit an escaped quote and
/// reopen it (`'\''`).
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// A command ready for the SSH engine: runs as root and expects the sudo
/// password on stdin.
#[derive(Clone)]
pub struct ElevatedCommand {
    /// Unelevated command line, safe to log
    pub display: String,
    /// Wire command line
    pub command_line: String,
    /// First line of stdin, consumed by `sudo -S`
    pub stdin: String,
    /// Whether a pseudo-terminal is requested for the command
    pub pty: bool,
}

impl fmt::Debug for ElevatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevatedCommand")
            .field("display", &self.display)
            .field("pty", &self.pty)
            .finish_non_exhaustive()
    }
}

/// Wrap `inner` in `sudo -S`. The password travels on stdin, never in the
/// command line.
pub fn elevate(inner: &str, password: &str, pty: bool) -> ElevatedCommand {
    ElevatedCommand {
        display: inner.to_string(),
        command_line: format!("sudo -S -p '' sh -c {}", shell_quote(inner)),
        stdin: format!("{}\n", password),
        pty,
    }
}

/// Builds jail tool command lines
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    jail_tool: String,
    remove_confirm_blank_lines: usize,
    macvlan_interface: String,
    bridge_interface: String,
    docker_config_url: String,
}

impl CommandBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            jail_tool: config.jail_tool.clone(),
            remove_confirm_blank_lines: config.remove_confirm_blank_lines,
            macvlan_interface: config.macvlan_interface.clone(),
            bridge_interface: config.bridge_interface.clone(),
            docker_config_url: config.docker_config_url.clone(),
        }
    }

    /// Build the command line for an action
    pub fn build(&self, action: &ActionRequest) -> Result<String> {
        match action {
            ActionRequest::Lifecycle { action, name, path } => {
                require("name", name)?;
                require("path", path)?;
                Ok(match action {
                    LifecycleAction::Remove => self.remove(name, path),
                    verb => self.lifecycle(*verb, name, path),
                })
            }
            ActionRequest::Create { name, path, spec } => {
                require("name", name)?;
                require("path", path)?;
                self.create(name, path, spec)
            }
            ActionRequest::Raw { command } => {
                require("command", command)?;
                Ok(command.clone())
            }
        }
    }

    /// `list` in one jail root
    pub fn list(&self, path: &str) -> String {
        format!("cd {} && {} list", shell_quote(path), self.jail_tool)
    }

    /// Lines typed into a fresh interactive shell to attach to a jail
    pub fn shell_attach(&self, path: &str, name: &str) -> Vec<String> {
        vec![
            STTY_ERASE.to_string(),
            format!("cd {}", shell_quote(path)),
            format!("sudo {} shell {}", self.jail_tool, shell_quote(name)),
        ]
    }

    /// Lines typed into a fresh general-purpose shell
    pub fn shell_prelude(&self) -> Vec<String> {
        vec![STTY_ERASE.to_string()]
    }

    fn lifecycle(&self, verb: LifecycleAction, name: &str, path: &str) -> String {
        format!(
            "cd {} && {} {} {}",
            shell_quote(path),
            self.jail_tool,
            verb.as_str(),
            shell_quote(name)
        )
    }

    /// The tool asks for the jail name again before removing; feed it on stdin
    fn remove(&self, name: &str, path: &str) -> String {
        let mut confirmation = vec![shell_quote(name)];
        confirmation.extend(std::iter::repeat("''".to_string()).take(self.remove_confirm_blank_lines));

        format!(
            "cd {} && printf '%s\\n' {} | {} remove {}",
            shell_quote(path),
            confirmation.join(" "),
            self.jail_tool,
            shell_quote(name)
        )
    }

    fn create(&self, name: &str, path: &str, spec: &CreateSpec) -> Result<String> {
        let mut prelude = Vec::new();
        let mut args = vec!["create".to_string(), "--start".to_string()];

        match spec {
            CreateSpec::CustomConfig { config_file } => {
                if config_file.trim().is_empty() {
                    return Err(Error::InvalidParameter(
                        "config_file is required for a custom config create".to_string(),
                    ));
                }
                args.push("--config".to_string());
                args.push(shell_quote(&join_remote(path, config_file.trim())));
            }
            CreateSpec::Docker { network, bind } => {
                prelude.push(format!(
                    "curl -fsSL -o config {}",
                    shell_quote(&self.docker_config_url)
                ));
                args.push("--config".to_string());
                args.push(shell_quote(&join_remote(path, "config")));
                args.push(self.network_flag(*network));
                args.extend(bind_flag(bind.as_ref()));
                args.push(SECURITY_FLAGS.to_string());
            }
            CreateSpec::Standard {
                distro,
                release,
                gpu,
                network,
                bind,
            } => {
                require("distro", distro)?;
                require("release", release)?;
                args.push(format!("--distro={}", shell_quote(distro)));
                args.push(format!("--release={}", shell_quote(release)));
                args.push("--startup=1".to_string());
                args.push("--seccomp=1".to_string());
                args.extend(gpu_flags(*gpu));
                args.push(self.network_flag(*network));
                args.extend(bind_flag(bind.as_ref()));
                args.push(SECURITY_FLAGS.to_string());
            }
        }

        args.push(shell_quote(name));
        prelude.push(format!("{} {}", self.jail_tool, args.join(" ")));

        Ok(format!("cd {} && {}", shell_quote(path), prelude.join(" && ")))
    }

    fn network_flag(&self, network: NetworkMode) -> String {
        match network {
            NetworkMode::Macvlan => format!("--network-macvlan={}", self.macvlan_interface),
            NetworkMode::Bridge => format!("--network-bridge={}", self.bridge_interface),
        }
    }
}

fn gpu_flags(gpu: GpuPassthrough) -> [String; 2] {
    [
        format!("-gi={}", gpu.intel as u8),
        format!("-gn={}", gpu.nvidia as u8),
    ]
}

/// Omitted unless both sides are present
fn bind_flag(bind: Option<&BindMount>) -> Option<String> {
    bind.filter(|b| b.is_complete()).map(|b| {
        format!(
            "--bind={}",
            shell_quote(&format!("{}:{}", b.host_path.trim(), b.jail_path.trim()))
        )
    })
}

fn join_remote(dir: &str, file: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, file)
    } else {
        format!("{}/{}", dir, file)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::MissingParameter(field.to_string()))
    } else {
        Ok(())
    }
}
