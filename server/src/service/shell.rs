//! Interactive shell service

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::domain::types::TerminalSize;
use crate::error::{Error, Result};
use crate::infra::sqlite::EndpointResolver;
use crate::infra::ssh::{RemoteExecutor, ShellChannels, ShellInput};
use crate::service::command::CommandBuilder;

/// What a new shell is opened into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellTarget {
    /// Plain login shell on the remote host
    Host,
    /// Attached to a jail through the jail tool
    Jail { path: String, name: String },
}

/// An open shell and its slot in the session tracker
pub struct OpenShell {
    pub channels: ShellChannels,
    pub registration: ShellRegistration,
}

/// Shell service for interactive sessions
pub struct ShellService {
    resolver: Arc<dyn EndpointResolver>,
    executor: Arc<dyn RemoteExecutor>,
    builder: CommandBuilder,
    sessions: ShellSessions,
    term: String,
    initial_size: TerminalSize,
}

impl ShellService {
    /// Create a new shell service
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        executor: Arc<dyn RemoteExecutor>,
        sessions: ShellSessions,
        config: &Config,
    ) -> Self {
        Self {
            resolver,
            executor,
            builder: CommandBuilder::new(config),
            sessions,
            term: config.shell_term.clone(),
            initial_size: TerminalSize::new(config.shell_cols, config.shell_rows),
        }
    }

    /// Authenticate and open a pty shell, then type the prelude for `target`
    pub async fn open(&self, username: &str, target: &ShellTarget) -> Result<OpenShell> {
        let endpoint = self.resolver.resolve(username).await?;
        let session = self.executor.connect(&endpoint).await?;
        let channels = session.open_shell(&self.term, self.initial_size).await?;

        let lines = match target {
            ShellTarget::Host => self.builder.shell_prelude(),
            ShellTarget::Jail { path, name } => self.builder.shell_attach(path, name),
        };
        for line in lines {
            channels
                .input
                .send(ShellInput::Data(format!("{}\n", line).into_bytes()))
                .await
                .map_err(|_| Error::SshChannel("shell closed during setup".to_string()))?;
        }

        info!(user = %username, target = ?target, "Shell ready");
        Ok(OpenShell {
            channels,
            registration: self.sessions.register(username),
        })
    }

    /// Close every live shell of a user, returning how many were signalled
    pub fn disconnect_user(&self, username: &str) -> usize {
        self.sessions.disconnect_user(username)
    }
}

/// Live interactive shells per user, so they can be closed from outside the
/// websocket that owns them
#[derive(Clone, Default)]
pub struct ShellSessions {
    sessions: Arc<DashMap<String, HashMap<u64, watch::Sender<bool>>>>,
    next_id: Arc<AtomicU64>,
}

impl ShellSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, username: &str) -> ShellRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        self.sessions
            .entry(username.to_string())
            .or_default()
            .insert(id, tx);

        ShellRegistration {
            id,
            username: username.to_string(),
            sessions: self.clone(),
            closed: rx,
        }
    }

    pub fn disconnect_user(&self, username: &str) -> usize {
        match self.sessions.remove(username) {
            Some((_, senders)) => {
                for sender in senders.values() {
                    let _ = sender.send(true);
                }
                info!(user = %username, count = senders.len(), "Disconnecting shells");
                senders.len()
            }
            None => 0,
        }
    }

    pub fn count(&self, username: &str) -> usize {
        self.sessions.get(username).map(|s| s.len()).unwrap_or(0)
    }

    fn unregister(&self, username: &str, id: u64) {
        if let Some(mut entry) = self.sessions.get_mut(username) {
            entry.remove(&id);
        }
        self.sessions.remove_if(username, |_, entry| entry.is_empty());
    }
}

/// Slot of one shell in [`ShellSessions`], released on drop
pub struct ShellRegistration {
    id: u64,
    username: String,
    sessions: ShellSessions,
    closed: watch::Receiver<bool>,
}

impl ShellRegistration {
    /// Resolves once the user's shells are disconnected from outside
    pub async fn disconnected(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for ShellRegistration {
    fn drop(&mut self) {
        self.sessions.unregister(&self.username, self.id);
    }
}
