//! Jail service: runs jail tool actions on a user's remote host

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::action::{ActionId, ActionRequest, LifecycleAction};
use crate::domain::endpoint::RemoteEndpoint;
use crate::domain::types::{RemoteOutput, SandboxListing};
use crate::error::{Error, Result};
use crate::infra::sqlite::EndpointResolver;
use crate::infra::ssh::RemoteExecutor;
use crate::service::command::{elevate, CommandBuilder, ElevatedCommand};
use crate::service::output::{filter_password, PasswordFilter};
use crate::service::registry::{ActionPublisher, StreamRegistry};

/// Output chunks buffered between the SSH channel and the action channel
const STREAM_BUFFER: usize = 256;

/// Jail service for buffered and streamed remote actions
pub struct JailService {
    resolver: Arc<dyn EndpointResolver>,
    executor: Arc<dyn RemoteExecutor>,
    registry: StreamRegistry,
    builder: CommandBuilder,
    benign_stderr_markers: Vec<String>,
    command_timeout: Option<Duration>,
}

impl JailService {
    /// Create a new jail service
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        executor: Arc<dyn RemoteExecutor>,
        registry: StreamRegistry,
        config: &Config,
    ) -> Self {
        Self {
            resolver,
            executor,
            registry,
            builder: CommandBuilder::new(config),
            benign_stderr_markers: config.benign_stderr_markers.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    /// Run an action and wait for its complete output.
    ///
    /// Fails with `RemoteCommandFailed` carrying the output when the action
    /// did not succeed.
    pub async fn run(&self, username: &str, action: &ActionRequest) -> Result<String> {
        let (endpoint, command) = self.prepare(username, action, false).await?;
        info!(
            user = %username,
            action = action.kind(),
            jail = action.jail_name().unwrap_or("-"),
            command = %command.display,
            "Running action"
        );

        let mut session = self.executor.connect(&endpoint).await?;
        let result = bounded(self.command_timeout, session.exec(&command)).await;
        session.close().await;
        let output = result?;

        let text = filter_password(&output.combined(), &endpoint.password);
        if self.succeeded(action, &output) {
            info!(user = %username, action = action.kind(), "Action succeeded");
            Ok(text)
        } else {
            warn!(
                user = %username,
                action = action.kind(),
                exit_status = ?output.exit_status,
                "Action failed"
            );
            Err(Error::RemoteCommandFailed(failure_message(text, &output)))
        }
    }

    /// Start an action in the background, publishing its output on the
    /// action channel. Returns once the command is built and the endpoint
    /// resolved; connection and execution happen after.
    pub async fn dispatch(
        &self,
        username: &str,
        action: &ActionRequest,
        action_id: &ActionId,
    ) -> Result<()> {
        let publisher = self.registry.attach_producer(action_id).ok_or_else(|| {
            Error::InvalidParameter(format!("action {} is already running", action_id))
        })?;

        let (endpoint, command) = match self.prepare(username, action, true).await {
            Ok(prepared) => prepared,
            Err(e) => {
                publisher.error(e.to_string());
                publisher.done(false);
                return Err(e);
            }
        };

        info!(
            user = %username,
            action = action.kind(),
            action_id = %action_id,
            jail = action.jail_name().unwrap_or("-"),
            command = %command.display,
            "Dispatching action"
        );

        tokio::spawn(stream_command(
            self.executor.clone(),
            endpoint,
            command,
            publisher,
            self.command_timeout,
        ));

        Ok(())
    }

    /// Raw `list` output of every configured jail root.
    ///
    /// All paths share one connection; a failing path reports its error
    /// inline and does not stop the others.
    pub async fn list_sandboxes(&self, username: &str) -> Result<Vec<SandboxListing>> {
        let endpoint = self.resolver.resolve(username).await?;
        if endpoint.paths.is_empty() {
            return Err(Error::NoPathsConfigured(username.to_string()));
        }

        let mut session = self.executor.connect(&endpoint).await?;
        let mut listings = Vec::with_capacity(endpoint.paths.len());

        for path in &endpoint.paths {
            let command = elevate(&self.builder.list(path), &endpoint.password, false);
            let output = match bounded(self.command_timeout, session.exec(&command)).await {
                Ok(out) => {
                    let text = filter_password(&out.combined(), &endpoint.password);
                    if !out.exited_zero() {
                        format!("Error: {}", failure_message(text, &out))
                    } else if text.is_empty() {
                        "No output available.".to_string()
                    } else {
                        text
                    }
                }
                Err(e) => {
                    warn!(user = %username, path = %path, "Listing failed: {}", e);
                    format!("Error: {}", e)
                }
            };
            listings.push(SandboxListing {
                path: path.clone(),
                output,
            });
        }

        session.close().await;
        Ok(listings)
    }

    async fn prepare(
        &self,
        username: &str,
        action: &ActionRequest,
        pty: bool,
    ) -> Result<(RemoteEndpoint, ElevatedCommand)> {
        if username.trim().is_empty() {
            return Err(Error::MissingParameter("username".to_string()));
        }
        let inner = self.builder.build(action)?;
        let endpoint = self.resolver.resolve(username).await?;
        let command = elevate(&inner, &endpoint.password, pty);
        Ok((endpoint, command))
    }

    /// start/stop/restart also fail on stderr without a benign marker
    fn succeeded(&self, action: &ActionRequest, output: &RemoteOutput) -> bool {
        if !output.exited_zero() {
            return false;
        }
        match action {
            ActionRequest::Lifecycle {
                action: LifecycleAction::Remove,
                ..
            } => true,
            ActionRequest::Lifecycle { .. } => self.stderr_is_benign(&output.stderr),
            ActionRequest::Create { .. } | ActionRequest::Raw { .. } => true,
        }
    }

    /// Empty stderr, or any line carrying a benign marker
    fn stderr_is_benign(&self, stderr: &str) -> bool {
        let mut lines = stderr.lines().map(str::trim).filter(|line| !line.is_empty()).peekable();
        if lines.peek().is_none() {
            return true;
        }
        lines.any(|line| {
            self.benign_stderr_markers
                .iter()
                .any(|marker| line.contains(marker.as_str()))
        })
    }
}

fn failure_message(text: String, output: &RemoteOutput) -> String {
    if !text.is_empty() {
        return text;
    }
    match output.exit_status {
        Some(status) => format!("exit status {}", status),
        None => "connection closed without exit status".to_string(),
    }
}

/// Apply the optional command timeout
async fn bounded<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::RemoteCommandFailed("command timed out".to_string()))?,
        None => fut.await,
    }
}

async fn stream_command(
    executor: Arc<dyn RemoteExecutor>,
    endpoint: RemoteEndpoint,
    command: ElevatedCommand,
    publisher: ActionPublisher,
    timeout: Option<Duration>,
) {
    let (tx, mut rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    let mut filter = PasswordFilter::new(&endpoint.password);

    let run = bounded(timeout, async {
        let mut session = executor.connect(&endpoint).await?;
        let result = session.exec_streaming(&command, tx).await;
        session.close().await;
        result
    });

    let forward = async {
        while let Some(chunk) = rx.recv().await {
            publisher.data(filter.push_bytes(&chunk));
        }
        publisher.data(filter.finish());
    };

    let (result, ()) = tokio::join!(run, forward);

    match result {
        Ok(exit_status) => {
            let success = exit_status == Some(0);
            info!(
                action_id = %publisher.id(),
                exit_status = ?exit_status,
                success,
                "Action finished"
            );
            publisher.done(success);
        }
        Err(e) => {
            warn!(action_id = %publisher.id(), "Action failed: {}", e);
            publisher.error(e.to_string());
            publisher.done(false);
        }
    }
}
