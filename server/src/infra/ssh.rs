//! SSH transport
//!
//! [`RemoteExecutor`] is the seam between the services and russh. A session
//! authenticates with the stored password and falls back to
//! keyboard-interactive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::HashAlg;
use russh::{ChannelMsg, Disconnect};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::endpoint::RemoteEndpoint;
use crate::domain::types::{RemoteOutput, TerminalSize};
use crate::error::{Error, Result};
use crate::service::command::ElevatedCommand;

/// Upper bound on keyboard-interactive prompt rounds
const MAX_KEYBOARD_ROUNDS: usize = 5;

/// Shell output chunks buffered toward the websocket
const SHELL_OUTPUT_BUFFER: usize = 256;

/// Input accepted by an open interactive shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    Data(Vec<u8>),
    Resize(TerminalSize),
    Close,
}

/// Both directions of an open interactive shell.
///
/// Dropping `input` or sending [`ShellInput::Close`] tears the session down.
/// `output` yields `None` once the remote side is gone.
pub struct ShellChannels {
    pub input: mpsc::Sender<ShellInput>,
    pub output: mpsc::Receiver<Vec<u8>>,
}

/// Opens authenticated sessions to a remote endpoint
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn RemoteSession>>;
}

/// One authenticated SSH connection
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command and collect all of its output
    async fn exec(&mut self, command: &ElevatedCommand) -> Result<RemoteOutput>;

    /// Run a command, forwarding output chunks as they arrive.
    ///
    /// Returns the exit status, `None` if the server sent none.
    async fn exec_streaming(
        &mut self,
        command: &ElevatedCommand,
        output: mpsc::Sender<Bytes>,
    ) -> Result<Option<u32>>;

    /// Turn the connection into an interactive pty shell
    async fn open_shell(self: Box<Self>, term: &str, size: TerminalSize) -> Result<ShellChannels>;

    async fn close(self: Box<Self>);
}

/// Host keys are accepted and logged; the endpoint is user-configured
struct HostKeyLogger {
    address: String,
}

impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            address = %self.address,
            algorithm = %key.algorithm(),
            fingerprint = %key.fingerprint(HashAlg::Sha256),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// russh-backed executor
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn RemoteSession>> {
        let address = endpoint.address();
        debug!(address = %address, "Connecting over SSH");

        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let handler = HostKeyLogger {
            address: address.clone(),
        };

        let connect = client::connect(
            Arc::new(config),
            (endpoint.host.as_str(), endpoint.port),
            handler,
        );
        let mut handle = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                Error::SshConnection(format!(
                    "{} timed out after {}s",
                    address,
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::SshConnection(format!("{}: {}", address, e)))?;

        authenticate(&mut handle, endpoint).await?;
        info!(address = %address, "SSH session established");

        Ok(Box::new(SshSession { handle, address }))
    }
}

async fn authenticate(handle: &mut Handle<HostKeyLogger>, endpoint: &RemoteEndpoint) -> Result<()> {
    let auth_error = |e: russh::Error| {
        Error::SshAuthentication(format!("{} ({})", endpoint.address(), e))
    };

    let result = handle
        .authenticate_password(endpoint.login.as_str(), endpoint.password.as_str())
        .await
        .map_err(auth_error)?;
    if let client::AuthResult::Success = result {
        return Ok(());
    }

    debug!(address = %endpoint.address(), "Password auth rejected, trying keyboard-interactive");
    let mut response = handle
        .authenticate_keyboard_interactive_start(endpoint.login.as_str(), None::<String>)
        .await
        .map_err(auth_error)?;

    for _ in 0..MAX_KEYBOARD_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::Failure { .. } => break,
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let answers = prompts.iter().map(|_| endpoint.password.clone()).collect();
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(auth_error)?;
            }
        }
    }

    Err(Error::SshAuthentication(endpoint.address()))
}

struct SshSession {
    handle: Handle<HostKeyLogger>,
    address: String,
}

impl SshSession {
    async fn start(&self, command: &ElevatedCommand) -> Result<russh::Channel<client::Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::SshChannel(format!("{}: {}", self.address, e)))?;

        if command.pty {
            channel
                .request_pty(false, "xterm", 200, 50, 0, 0, &[])
                .await
                .map_err(|e| Error::SshChannel(format!("pty request failed: {}", e)))?;
        }

        channel
            .exec(true, command.command_line.as_bytes())
            .await
            .map_err(|e| Error::SshChannel(format!("exec failed: {}", e)))?;

        channel
            .data(command.stdin.as_bytes())
            .await
            .map_err(|e| Error::SshChannel(format!("stdin write failed: {}", e)))?;
        if !command.pty {
            channel
                .eof()
                .await
                .map_err(|e| Error::SshChannel(format!("stdin close failed: {}", e)))?;
        }

        Ok(channel)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &ElevatedCommand) -> Result<RemoteOutput> {
        debug!(address = %self.address, command = %command.display, "Running remote command");
        let mut channel = self.start(command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    stderr.extend_from_slice(&data)
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    async fn exec_streaming(
        &mut self,
        command: &ElevatedCommand,
        output: mpsc::Sender<Bytes>,
    ) -> Result<Option<u32>> {
        debug!(address = %self.address, command = %command.display, "Streaming remote command");
        let mut channel = self.start(command).await?;
        let mut exit_status = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    // A gone consumer does not stop the command
                    let _ = output.send(Bytes::copy_from_slice(&data)).await;
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        Ok(exit_status)
    }

    async fn open_shell(self: Box<Self>, term: &str, size: TerminalSize) -> Result<ShellChannels> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::SshChannel(format!("{}: {}", self.address, e)))?;
        channel
            .request_pty(true, term, size.cols as u32, size.rows as u32, 0, 0, &[])
            .await
            .map_err(|e| Error::SshChannel(format!("pty request failed: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| Error::SshChannel(format!("shell request failed: {}", e)))?;

        let (input_tx, input_rx) = mpsc::channel(SHELL_OUTPUT_BUFFER);
        let (output_tx, output_rx) = mpsc::channel(SHELL_OUTPUT_BUFFER);

        info!(address = %self.address, cols = size.cols, rows = size.rows, "Interactive shell opened");
        tokio::spawn(pump_shell(*self, channel, input_rx, output_tx));

        Ok(ShellChannels {
            input: input_tx,
            output: output_rx,
        })
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(address = %self.address, "Disconnect failed: {}", e);
        }
    }
}

/// Moves bytes between the shell channel and the relay until either side ends
async fn pump_shell(
    session: SshSession,
    mut channel: russh::Channel<client::Msg>,
    mut input: mpsc::Receiver<ShellInput>,
    output: mpsc::Sender<Vec<u8>>,
) {
    // Output waiting for room toward the relay; input keeps draining meanwhile
    let mut pending: Option<Vec<u8>> = None;

    loop {
        tokio::select! {
            permit = output.reserve(), if pending.is_some() => match permit {
                Ok(permit) => {
                    if let Some(bytes) = pending.take() {
                        permit.send(bytes);
                    }
                }
                Err(_) => break,
            },
            msg = channel.wait(), if pending.is_none() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    pending = Some(data.to_vec());
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            },
            cmd = input.recv() => match cmd {
                Some(ShellInput::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!(address = %session.address, "Shell write failed: {}", e);
                        break;
                    }
                }
                Some(ShellInput::Resize(size)) => {
                    if let Err(e) = channel
                        .window_change(size.cols as u32, size.rows as u32, 0, 0)
                        .await
                    {
                        warn!(address = %session.address, "Shell resize failed: {}", e);
                    }
                }
                Some(ShellInput::Close) | None => break,
            },
        }
    }

    let _ = channel.close().await;
    info!(address = %session.address, "Interactive shell closed");
    Box::new(session).close().await;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory stand-in for the SSH transport

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Test-side ends of an opened fake shell
    pub struct FakeShellEnds {
        pub input: mpsc::Receiver<ShellInput>,
        pub output: mpsc::Sender<Vec<u8>>,
    }

    /// Scripted remote host shared by every session the executor opens
    #[derive(Default)]
    pub struct FakeRemote {
        pub refuse_connection: bool,
        pub replies: Mutex<VecDeque<RemoteOutput>>,
        pub stream_chunks: Vec<Vec<u8>>,
        pub stream_exit: Option<u32>,
        pub commands: Mutex<Vec<ElevatedCommand>>,
        pub shell_ends: Mutex<Option<FakeShellEnds>>,
        pub shell_size: Mutex<Option<TerminalSize>>,
        pub connections: AtomicUsize,
        pub closed: AtomicUsize,
    }

    impl FakeRemote {
        pub fn reply(self, output: RemoteOutput) -> Self {
            self.replies.lock().unwrap().push_back(output);
            self
        }

        pub fn recorded(&self) -> Vec<ElevatedCommand> {
            self.commands.lock().unwrap().clone()
        }

        pub fn take_shell(&self) -> FakeShellEnds {
            self.shell_ends.lock().unwrap().take().expect("no shell opened")
        }
    }

    pub struct FakeExecutor(pub Arc<FakeRemote>);

    #[async_trait]
    impl RemoteExecutor for FakeExecutor {
        async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn RemoteSession>> {
            if self.0.refuse_connection {
                return Err(Error::SshConnection(format!(
                    "{}: connection refused",
                    endpoint.address()
                )));
            }
            self.0.connections.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    struct FakeSession(Arc<FakeRemote>);

    #[async_trait]
    impl RemoteSession for FakeSession {
        async fn exec(&mut self, command: &ElevatedCommand) -> Result<RemoteOutput> {
            self.0.commands.lock().unwrap().push(command.clone());
            let reply = self.0.replies.lock().unwrap().pop_front();
            Ok(reply.unwrap_or(RemoteOutput {
                exit_status: Some(0),
                ..Default::default()
            }))
        }

        async fn exec_streaming(
            &mut self,
            command: &ElevatedCommand,
            output: mpsc::Sender<Bytes>,
        ) -> Result<Option<u32>> {
            self.0.commands.lock().unwrap().push(command.clone());
            for chunk in &self.0.stream_chunks {
                let _ = output.send(Bytes::from(chunk.clone())).await;
            }
            Ok(self.0.stream_exit)
        }

        async fn open_shell(
            self: Box<Self>,
            _term: &str,
            size: TerminalSize,
        ) -> Result<ShellChannels> {
            let (input_tx, mut input_rx) = mpsc::channel(64);
            let (forward_tx, forward_rx) = mpsc::channel(64);
            let (output_tx, output_rx) = mpsc::channel(64);
            *self.0.shell_size.lock().unwrap() = Some(size);
            *self.0.shell_ends.lock().unwrap() = Some(FakeShellEnds {
                input: forward_rx,
                output: output_tx,
            });

            // Stands in for the pump: the session closes once input ends
            let remote = self.0.clone();
            tokio::spawn(async move {
                loop {
                    let item = input_rx.recv().await;
                    let closing = matches!(item, Some(ShellInput::Close) | None);
                    if let Some(item) = item {
                        let _ = forward_tx.send(item).await;
                    }
                    if closing {
                        remote.closed.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                }
            });
            Ok(ShellChannels {
                input: input_tx,
                output: output_rx,
            })
        }

        async fn close(self: Box<Self>) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
