//! Jail action domain model

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle verbs the jail tool accepts for an existing jail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
    /// Asks for an interactive confirmation on stdin
    Remove,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Remove => "remove",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(LifecycleAction::Start),
            "stop" => Some(LifecycleAction::Stop),
            "restart" => Some(LifecycleAction::Restart),
            "remove" => Some(LifecycleAction::Remove),
            _ => None,
        }
    }
}

/// A user-initiated operation, built into exactly one remote command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    Lifecycle {
        action: LifecycleAction,
        name: String,
        path: String,
    },
    Create {
        name: String,
        path: String,
        spec: CreateSpec,
    },
    Raw {
        command: String,
    },
}

impl ActionRequest {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ActionRequest::Lifecycle { action, .. } => action.as_str(),
            ActionRequest::Create { .. } => "create",
            ActionRequest::Raw { .. } => "raw_command",
        }
    }

    /// Jail name, when the action targets one
    pub fn jail_name(&self) -> Option<&str> {
        match self {
            ActionRequest::Lifecycle { name, .. } | ActionRequest::Create { name, .. } => {
                Some(name)
            }
            ActionRequest::Raw { .. } => None,
        }
    }
}

/// How a new jail is configured. Each mode emits its own flag family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CreateSpec {
    /// Config file already placed in the jail root
    CustomConfig { config_file: String },
    /// Downloads the published docker config before creating
    Docker {
        #[serde(default)]
        network: NetworkMode,
        #[serde(default)]
        bind: Option<BindMount>,
    },
    Standard {
        distro: String,
        release: String,
        #[serde(default)]
        gpu: GpuPassthrough,
        #[serde(default)]
        network: NetworkMode,
        #[serde(default)]
        bind: Option<BindMount>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    #[default]
    Bridge,
    /// Static IP on the host interface
    Macvlan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuPassthrough {
    #[serde(default)]
    pub intel: bool,
    #[serde(default)]
    pub nvidia: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    #[serde(default)]
    pub host_path: String,
    #[serde(default)]
    pub jail_path: String,
}

impl BindMount {
    /// The tool only binds when both sides are given
    pub fn is_complete(&self) -> bool {
        !self.host_path.trim().is_empty() && !self.jail_path.trim().is_empty()
    }
}

/// Correlates a streamed dispatch with its log viewers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Server-generated id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-provided id
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingParameter("actionId".to_string()));
        }
        if trimmed.len() > 128 {
            return Err(Error::InvalidParameter("actionId is too long".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
