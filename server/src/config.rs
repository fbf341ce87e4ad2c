//! Server configuration

use std::time::Duration;

use serde::Deserialize;

/// Published config used by the docker-enabled create flow
const DOCKER_CONFIG_URL: &str =
    "https://raw.githubusercontent.com/kosztyk/TrueNas-Scale-Jailmaker-GUI/main/config";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Database URL (SQLite) for the user-record store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory served as the browser UI
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// JSON file mapping distro names to their releases
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,

    /// Jail tool invocation, relative to the jail root path
    #[serde(default = "default_jail_tool")]
    pub jail_tool: String,

    /// Seconds a finished action channel stays readable
    #[serde(default = "default_action_grace_period")]
    pub action_grace_period: u64,

    /// Blank lines piped after the jail name when confirming a remove
    #[serde(default = "default_remove_confirm_blank_lines")]
    pub remove_confirm_blank_lines: usize,

    /// Host interface used for `--network-macvlan`
    #[serde(default = "default_macvlan_interface")]
    pub macvlan_interface: String,

    /// Host bridge used for `--network-bridge`
    #[serde(default = "default_bridge_interface")]
    pub bridge_interface: String,

    /// Config file downloaded for docker-enabled jails
    #[serde(default = "default_docker_config_url")]
    pub docker_config_url: String,

    /// SSH connection establishment timeout in seconds
    #[serde(default = "default_ssh_connect_timeout")]
    pub ssh_connect_timeout: u64,

    /// Remote command timeout in seconds.
    /// `None` keeps commands running until the remote side finishes.
    #[serde(default)]
    pub command_timeout: Option<u64>,

    /// Terminal type requested for interactive shells
    #[serde(default = "default_shell_term")]
    pub shell_term: String,

    /// Initial interactive shell width
    #[serde(default = "default_shell_cols")]
    pub shell_cols: u16,

    /// Initial interactive shell height
    #[serde(default = "default_shell_rows")]
    pub shell_rows: u16,

    /// Stderr markers that do not indicate a failed lifecycle action
    #[serde(default = "default_benign_stderr_markers")]
    pub benign_stderr_markers: Vec<String>,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite:data/jailmaker.db?mode=rwc".to_string()
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_catalog_file() -> String {
    "data/distros.json".to_string()
}

fn default_jail_tool() -> String {
    "./jlmkr.py".to_string()
}

fn default_action_grace_period() -> u64 {
    60
}

fn default_remove_confirm_blank_lines() -> usize {
    1
}

fn default_macvlan_interface() -> String {
    "eno1".to_string()
}

fn default_bridge_interface() -> String {
    "br1".to_string()
}

fn default_docker_config_url() -> String {
    DOCKER_CONFIG_URL.to_string()
}

fn default_ssh_connect_timeout() -> u64 {
    20
}

fn default_shell_term() -> String {
    "xterm-256color".to_string()
}

fn default_shell_cols() -> u16 {
    120
}

fn default_shell_rows() -> u16 {
    40
}

fn default_benign_stderr_markers() -> Vec<String> {
    vec!["Running as unit:".to_string()]
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(val) = std::env::var("JAILMAKER_HTTP_HOST") {
            config.http_host = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http_port = port;
            }
        }
        if let Ok(val) = std::env::var("JAILMAKER_DATABASE_URL") {
            config.database_url = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_STATIC_DIR") {
            config.static_dir = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_CATALOG_FILE") {
            config.catalog_file = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_JAIL_TOOL") {
            config.jail_tool = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_ACTION_GRACE_PERIOD") {
            if let Ok(secs) = val.parse() {
                config.action_grace_period = secs;
            }
        }
        if let Ok(val) = std::env::var("JAILMAKER_REMOVE_CONFIRM_BLANK_LINES") {
            if let Ok(lines) = val.parse() {
                config.remove_confirm_blank_lines = lines;
            }
        }
        if let Ok(val) = std::env::var("JAILMAKER_MACVLAN_INTERFACE") {
            config.macvlan_interface = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_BRIDGE_INTERFACE") {
            config.bridge_interface = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_DOCKER_CONFIG_URL") {
            config.docker_config_url = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_SSH_CONNECT_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.ssh_connect_timeout = secs;
            }
        }
        if let Ok(val) = std::env::var("JAILMAKER_COMMAND_TIMEOUT") {
            // 0 or garbage means "no timeout"
            config.command_timeout = val.parse().ok().filter(|secs| *secs > 0);
        }
        if let Ok(val) = std::env::var("JAILMAKER_SHELL_TERM") {
            config.shell_term = val;
        }
        if let Ok(val) = std::env::var("JAILMAKER_SHELL_COLS") {
            if let Ok(cols) = val.parse() {
                config.shell_cols = cols;
            }
        }
        if let Ok(val) = std::env::var("JAILMAKER_SHELL_ROWS") {
            if let Ok(rows) = val.parse() {
                config.shell_rows = rows;
            }
        }
        if let Ok(val) = std::env::var("JAILMAKER_BENIGN_STDERR_MARKERS") {
            config.benign_stderr_markers = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.action_grace_period)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            database_url: default_database_url(),
            static_dir: default_static_dir(),
            catalog_file: default_catalog_file(),
            jail_tool: default_jail_tool(),
            action_grace_period: default_action_grace_period(),
            remove_confirm_blank_lines: default_remove_confirm_blank_lines(),
            macvlan_interface: default_macvlan_interface(),
            bridge_interface: default_bridge_interface(),
            docker_config_url: default_docker_config_url(),
            ssh_connect_timeout: default_ssh_connect_timeout(),
            command_timeout: None,
            shell_term: default_shell_term(),
            shell_cols: default_shell_cols(),
            shell_rows: default_shell_rows(),
            benign_stderr_markers: default_benign_stderr_markers(),
        }
    }
}
