//! Remote shell sessions.
//!
//! [`ShellSession`] is what the shell backend executes commands through.
//! [`RusshSession`] is the production implementation: one authenticated SSH
//! connection, one exec channel per command.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, info, warn};

use crate::config::{SshAuth, SshConfig};
use crate::error::{Result, TransportError};
use crate::traits::CommandOutput;

/// A session able to run one command at a time.
#[async_trait]
pub trait ShellSession: Send {
    /// Run a command line and collect its output once the remote process exits.
    async fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    /// Close the session.
    async fn close(&mut self) -> Result<()>;
}

/// Client handler. Server keys are accepted without verification, the
/// session always targets the single operator-configured host.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Authentication material, loaded before dialing.
enum Credential {
    Key(PrivateKeyWithHashAlg),
    Password(String),
}

impl Credential {
    async fn load(auth: SshAuth) -> Result<Self> {
        match auth {
            SshAuth::PublicKey(path) => {
                let key_data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    TransportError::Connection(format!(
                        "failed to read SSH key {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let key = keys::decode_secret_key(&key_data, None).map_err(|e| {
                    TransportError::Connection(format!("failed to decode SSH key: {}", e))
                })?;
                debug!(path = %path.display(), "Loaded SSH key");
                Ok(Credential::Key(PrivateKeyWithHashAlg::new(Arc::new(key), None)))
            }
            SshAuth::Password(password) => Ok(Credential::Password(password)),
        }
    }
}

/// SSH session backed by russh.
pub struct RusshSession {
    handle: client::Handle<ClientHandler>,
}

impl RusshSession {
    /// Open and authenticate a session.
    ///
    /// Connection and authentication failures are returned as
    /// [`TransportError::Connection`]; exceeding `timeout` as
    /// [`TransportError::Timeout`].
    pub async fn open(config: &SshConfig, timeout: Duration) -> Result<Self> {
        let auth = config.auth()?;

        tokio::time::timeout(timeout, Self::open_inner(config, auth))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_secs()))?
    }

    async fn open_inner(config: &SshConfig, auth: SshAuth) -> Result<Self> {
        let credential = Credential::load(auth).await?;
        let addr = config.address();
        let ssh_config = Arc::new(client::Config::default());

        info!(addr = %addr, user = %config.user, "Opening SSH session");

        let mut handle = client::connect(ssh_config, addr.as_str(), ClientHandler)
            .await
            .map_err(|e| TransportError::Connection(format!("SSH connect to {} failed: {}", addr, e)))?;

        let authenticated = match credential {
            Credential::Key(key) => handle
                .authenticate_publickey(&config.user, key)
                .await
                .map_err(|e| TransportError::Connection(format!("SSH auth failed: {}", e)))?
                .success(),
            Credential::Password(password) => handle
                .authenticate_password(&config.user, password)
                .await
                .map_err(|e| TransportError::Connection(format!("SSH auth failed: {}", e)))?
                .success(),
        };

        if !authenticated {
            warn!(user = %config.user, "SSH authentication rejected");
            return Err(TransportError::Connection(format!(
                "SSH authentication rejected for user {}",
                config.user
            )));
        }

        info!(addr = %addr, "SSH session authenticated");
        Ok(Self { handle })
    }
}

#[async_trait]
impl ShellSession for RusshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Connection(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::Connection(format!("failed to start command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<i32> = None;

        // Drain until the channel closes; exit status may arrive before the
        // last data frames.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(i32::try_from(exit_status).unwrap_or(i32::MAX))
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!(signal = ?signal_name, "Remote command killed by signal");
                }
                _ => {}
            }
        }

        Ok(CommandOutput::new(
            String::from_utf8_lossy(&stdout),
            String::from_utf8_lossy(&stderr),
            // No exit status means the process died without reporting one.
            exit_code.unwrap_or(-1),
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| TransportError::Connection(format!("SSH disconnect failed: {}", e)))
    }
}
