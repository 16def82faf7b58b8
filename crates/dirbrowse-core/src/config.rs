//! Connection configuration and its persisted record form.
//!
//! [`ConnectionConfig`] is the validated, in-memory description of one endpoint. The
//! persistence collaborator only ever sees [`ConnectionRecord`], a plain serializable struct;
//! [`ConnectionConfig::from_record`] and [`ConnectionConfig::to_record`] are the only bridge
//! between the two.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default port for plain directory connections.
pub const DEFAULT_PORT: u16 = 389;
/// Default port for connections with transport security.
pub const DEFAULT_TLS_PORT: u16 = 636;
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Configuration for one named directory endpoint.
///
/// Immutable once handed to the registry; changing an endpoint means re-adding a new
/// config under the same name.
#[derive(Clone, Validate)]
pub struct ConnectionConfig {
    #[validate(length(min = 1, message = "connection name cannot be empty"))]
    name: String,
    #[validate(length(min = 1, message = "host cannot be empty"))]
    host: String,
    #[validate(range(min = 1, message = "port must be between 1 and 65535"))]
    port: u16,
    bind_dn: String,
    credential: SecretString,
    use_tls: bool,
    base_root: String,
    tls_verify: bool,
    #[validate(range(min = 1, max = 300))]
    connection_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Creates a configuration for an anonymous, plain-text connection on the default port.
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            bind_dn: String::new(),
            credential: SecretString::from(String::new()),
            use_tls: false,
            base_root: String::new(),
            tls_verify: true,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
        }
    }

    /// Unique registry key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host name or address of the directory service.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configured port, before transport-security defaulting.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Port actually dialed: the plain default port becomes the secure default when
    /// transport security is enabled.
    #[must_use]
    pub const fn effective_port(&self) -> u16 {
        if self.use_tls && self.port == DEFAULT_PORT {
            DEFAULT_TLS_PORT
        } else {
            self.port
        }
    }

    /// Bind identity; empty means anonymous.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Returns true when a bind should be performed after opening the transport.
    #[must_use]
    pub fn has_bind_identity(&self) -> bool {
        !self.bind_dn.trim().is_empty()
    }

    /// Bind credential.
    #[must_use]
    pub const fn credential(&self) -> &SecretString {
        &self.credential
    }

    /// Whether the transport is wrapped in TLS.
    #[must_use]
    pub const fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Namespace root browsed by default; empty means the service's top-level root.
    #[must_use]
    pub fn base_root(&self) -> &str {
        &self.base_root
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Renames the configuration.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the bind identity and credential.
    #[must_use]
    pub fn with_bind(mut self, bind_dn: impl Into<String>, credential: impl Into<String>) -> Self {
        self.bind_dn = bind_dn.into();
        self.credential = SecretString::from(credential.into());
        self
    }

    /// Enables or disables transport security.
    #[must_use]
    pub const fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Sets the namespace root.
    #[must_use]
    pub fn with_base_root(mut self, base_root: impl Into<String>) -> Self {
        self.base_root = base_root.into();
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Builds and parses the endpoint URL (`ldap://` or `ldaps://`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the host does not form a valid URL.
    pub fn endpoint(&self) -> Result<Url> {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        let url = Url::parse(&format!(
            "{scheme}://{}:{}",
            self.host.trim(),
            self.effective_port()
        ))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::ConfigError(format!(
                "connection `{}` has no usable host",
                self.name
            )));
        }
        Ok(url)
    }

    /// Validates every field and the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first invalid field set.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        self.endpoint()?;
        Ok(())
    }

    /// Converts a persisted record into a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the record has no name or an out-of-range port.
    pub fn from_record(record: ConnectionRecord) -> Result<Self> {
        if record.name.trim().is_empty() {
            return Err(Error::ConfigError(
                "connection name cannot be empty".to_string(),
            ));
        }
        let port = u16::try_from(record.port).map_err(|_| {
            Error::ConfigError(format!(
                "connection `{}` has invalid port {}",
                record.name, record.port
            ))
        })?;

        Ok(Self::new(record.name, record.host)
            .with_port(port)
            .with_bind(record.bind_identity, record.credential)
            .with_tls(record.use_transport_security)
            .with_base_root(record.base_root)
            .with_tls_verification(record.tls_verify)
            .with_connection_timeout_secs(record.connection_timeout_secs))
    }

    /// Converts the configuration into its persisted record form.
    #[must_use]
    pub fn to_record(&self) -> ConnectionRecord {
        ConnectionRecord {
            name: self.name.clone(),
            host: self.host.clone(),
            port: u32::from(self.port),
            bind_identity: self.bind_dn.clone(),
            credential: self.credential.expose_secret().to_string(),
            use_transport_security: self.use_tls,
            base_root: self.base_root.clone(),
            tls_verify: self.tls_verify,
            connection_timeout_secs: self.connection_timeout_secs,
        }
    }
}

impl PartialEq for ConnectionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.host == other.host
            && self.port == other.port
            && self.bind_dn == other.bind_dn
            && self.credential.expose_secret() == other.credential.expose_secret()
            && self.use_tls == other.use_tls
            && self.base_root == other.base_root
            && self.tls_verify == other.tls_verify
            && self.connection_timeout_secs == other.connection_timeout_secs
    }
}

impl Eq for ConnectionConfig {}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bind_dn", &self.bind_dn)
            .field("credential", &"[REDACTED]")
            .field("use_tls", &self.use_tls)
            .field("base_root", &self.base_root)
            .field("tls_verify", &self.tls_verify)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.effective_port())
    }
}

/// Persisted form of a [`ConnectionConfig`].
///
/// Every field has a default so partially written records still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Unique connection name
    #[serde(default)]
    pub name: String,

    /// Directory host
    #[serde(default)]
    pub host: String,

    /// Directory port
    #[serde(default = "default_port")]
    pub port: u32,

    /// Bind identity (empty for anonymous)
    #[serde(default)]
    pub bind_identity: String,

    /// Bind credential
    #[serde(default)]
    pub credential: String,

    /// Whether to use TLS
    #[serde(default)]
    pub use_transport_security: bool,

    /// Namespace root
    #[serde(default)]
    pub base_root: String,

    /// Whether to verify TLS certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

const fn default_port() -> u32 {
    DEFAULT_PORT as u32
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

impl From<&ConnectionConfig> for ConnectionRecord {
    fn from(config: &ConnectionConfig) -> Self {
        config.to_record()
    }
}

impl TryFrom<ConnectionRecord> for ConnectionConfig {
    type Error = Error;

    fn try_from(record: ConnectionRecord) -> Result<Self> {
        Self::from_record(record)
    }
}
