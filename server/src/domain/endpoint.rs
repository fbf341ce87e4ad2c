//! Remote endpoint domain model

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// SSH parameters and jail roots of the host a user manages.
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    /// Absolute jail-root paths on the remote host, in display order
    pub paths: Vec<String>,
}

impl RemoteEndpoint {
    /// `login@host:port`, for log lines and error messages
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.login, self.host, self.port)
    }

    /// Check the record invariants before it is stored
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidParameter("serverIp must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidParameter(
                "serverPort must be a positive integer".to_string(),
            ));
        }
        if self.login.trim().is_empty() {
            return Err(Error::InvalidParameter("serverUser must not be empty".to_string()));
        }
        validate_paths(&self.paths)
    }
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("paths", &self.paths)
            .finish()
    }
}

/// Stored settings of one user as shown to the browser.
///
/// Carries no password field at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub username: String,
    pub server_ip: String,
    pub server_port: u16,
    pub server_user: String,
    pub paths: Vec<String>,
}

impl UserDetails {
    pub fn from_endpoint(username: &str, endpoint: &RemoteEndpoint) -> Self {
        Self {
            username: username.to_string(),
            server_ip: endpoint.host.clone(),
            server_port: endpoint.port,
            server_user: endpoint.login.clone(),
            paths: endpoint.paths.clone(),
        }
    }
}

/// Every jail root must be an absolute remote path
pub fn validate_paths(paths: &[String]) -> Result<()> {
    for path in paths {
        if !path.starts_with('/') {
            return Err(Error::InvalidParameter(format!(
                "path must be absolute: {}",
                path
            )));
        }
    }
    Ok(())
}
