//! Common domain types

use serde::{Deserialize, Serialize};

/// Everything a finished remote command produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the server closed the channel without an exit status
    pub exit_status: Option<u32>,
}

impl RemoteOutput {
    /// stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined.trim().to_string()
    }

    pub fn exited_zero(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Event published on an action channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    /// Raw terminal text, in receipt order
    Data(String),
    Error { message: String },
    Done { success: bool },
}

impl ActionEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, ActionEvent::Done { .. })
    }
}

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

/// Raw `list` output of one jail root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxListing {
    pub path: String,
    pub output: String,
}
