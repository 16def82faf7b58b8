//! Directory client contract and its `ldap3` implementation.

use crate::Result;
use async_trait::async_trait;
use dirbrowse_core::error::RESULT_LOCAL_ERROR;
use dirbrowse_core::{
    AttributeChange, AttributeChangeSet, Attributes, ConnectionConfig, DirectoryEntry, Error,
};
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use native_tls::TlsConnector;
use std::collections::HashSet;
use tracing::debug;

/// Filter matching every entry.
pub const MATCH_ALL_FILTER: &str = "(objectClass=*)";
/// Attribute selector for all user attributes.
pub const ALL_USER_ATTRIBUTES: &str = "*";

/// Represents the search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// One open transport to a directory service.
///
/// Every call may fail; a service rejection is reported as [`Error::ProtocolError`] with the
/// service result code, except for `bind`, which reports [`Error::AuthError`]. Implementations
/// enforce their own timeouts; callers get no cancellation beyond that.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send {
    /// Authenticates `identity` on the open transport.
    async fn bind(&mut self, identity: &str, credential: &str) -> Result<()>;

    /// Searches below `base` and returns matching entries.
    ///
    /// Only text attributes are returned. Values the service marks as binary (such as
    /// `jpegPhoto` or `userCertificate`) are left out of the snapshot.
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>>;

    /// Applies a change set to the entry at `path`.
    ///
    /// The `ldap3` implementation sends each value list as a set, so duplicate values are
    /// dropped and the service decides the stored order of a replaced attribute.
    async fn modify(&mut self, path: &str, changes: &AttributeChangeSet) -> Result<()>;

    /// Creates a new entry.
    async fn add(&mut self, path: &str, attributes: &Attributes) -> Result<()>;

    /// Deletes the entry at `path`.
    async fn delete(&mut self, path: &str) -> Result<()>;

    /// Returns true while the transport is usable.
    fn is_alive(&mut self) -> bool;

    /// Closes the transport.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports for a configured endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens an unauthenticated transport to the endpoint described by `config`.
    ///
    /// Failure to reach the endpoint is reported as [`Error::ConnectError`].
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn DirectoryClient>>;
}

/// Connector backed by `ldap3`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapConnector;

impl LdapConnector {
    /// Creates a new connector instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn DirectoryClient>> {
        let endpoint = config.endpoint()?;
        let settings = build_ldap_settings(config)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, endpoint.as_str())
            .await
            .map_err(|err| Error::ConnectError {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })?;
        ldap3::drive!(conn);
        debug!(endpoint = %endpoint, "directory transport opened");
        Ok(Box::new(LdapClient {
            inner: ldap,
            endpoint: endpoint.to_string(),
        }))
    }
}

struct LdapClient {
    inner: ldap3::Ldap,
    endpoint: String,
}

impl LdapClient {
    fn map_error(&self, err: LdapError) -> Error {
        map_ldap_error(&self.endpoint, err)
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    async fn bind(&mut self, identity: &str, credential: &str) -> Result<()> {
        let result = self
            .inner
            .simple_bind(identity, credential)
            .await
            .map_err(|err| self.map_error(err))?;
        result.success().map_err(|err| match self.map_error(err) {
            Error::ProtocolError { code, message } => Error::AuthError {
                identity: identity.to_string(),
                message: format!("{message} (result code {code})"),
            },
            other => other,
        })?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        let result = self
            .inner
            .search(base, scope.into(), filter, attributes.to_vec())
            .await
            .map_err(|err| self.map_error(err))?;
        let (entries, _) = result.success().map_err(|err| self.map_error(err))?;
        Ok(entries
            .into_iter()
            .map(|entry| text_entry(SearchEntry::construct(entry)))
            .collect())
    }

    async fn modify(&mut self, path: &str, changes: &AttributeChangeSet) -> Result<()> {
        let mods = changes
            .iter()
            .map(|change| match change {
                AttributeChange::Add { attribute, values } => {
                    Mod::Add(attribute.clone(), value_set(values))
                }
                AttributeChange::Replace { attribute, values } => {
                    Mod::Replace(attribute.clone(), value_set(values))
                }
                AttributeChange::Delete { attribute } => {
                    Mod::Delete(attribute.clone(), HashSet::new())
                }
            })
            .collect::<Vec<_>>();

        let result = self
            .inner
            .modify(path, mods)
            .await
            .map_err(|err| self.map_error(err))?;
        result.success().map_err(|err| self.map_error(err))?;
        Ok(())
    }

    async fn add(&mut self, path: &str, attributes: &Attributes) -> Result<()> {
        let attrs = attributes
            .iter()
            .map(|(name, values)| (name.clone(), value_set(values)))
            .collect::<Vec<_>>();
        let result = self
            .inner
            .add(path, attrs)
            .await
            .map_err(|err| self.map_error(err))?;
        result.success().map_err(|err| self.map_error(err))?;
        Ok(())
    }

    async fn delete(&mut self, path: &str) -> Result<()> {
        let result = self
            .inner
            .delete(path)
            .await
            .map_err(|err| self.map_error(err))?;
        result.success().map_err(|err| self.map_error(err))?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.inner.is_closed()
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .unbind()
            .await
            .map_err(|err| self.map_error(err))
    }
}

fn text_entry(entry: SearchEntry) -> DirectoryEntry {
    if !entry.bin_attrs.is_empty() {
        let mut skipped = entry.bin_attrs.keys().map(String::as_str).collect::<Vec<_>>();
        skipped.sort_unstable();
        debug!(path = %entry.dn, skipped = ?skipped, "binary attributes left out");
    }
    DirectoryEntry::new(entry.dn, entry.attrs.into_iter().collect())
}

fn value_set(values: &[String]) -> HashSet<String> {
    values.iter().cloned().collect()
}

fn build_ldap_settings(config: &ConnectionConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if config.use_tls() && !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    }

    Ok(settings)
}

/// Maps an `ldap3` failure: service rejections keep their result code, everything else is a
/// transport failure.
fn map_ldap_error(endpoint: &str, err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => Error::ProtocolError {
            code: result.rc,
            message: if result.text.is_empty() {
                format!("matched `{}`", result.matched)
            } else {
                result.text
            },
        },
        LdapError::Io { .. } | LdapError::Timeout { .. } => Error::ConnectError {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        },
        other => Error::ProtocolError {
            code: RESULT_LOCAL_ERROR,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_maps_to_ldap3() {
        assert!(matches!(Scope::from(SearchScope::Base), Scope::Base));
        assert!(matches!(Scope::from(SearchScope::OneLevel), Scope::OneLevel));
        assert!(matches!(Scope::from(SearchScope::Subtree), Scope::Subtree));
    }

    #[test]
    fn rejected_result_keeps_code() {
        let err = map_ldap_error(
            "ldap://localhost:389",
            LdapError::LdapResult {
                result: ldap3::LdapResult {
                    rc: 19,
                    matched: String::new(),
                    text: "constraint violation".to_string(),
                    refs: Vec::new(),
                    ctrls: Vec::new(),
                },
            },
        );
        assert_eq!(
            err,
            Error::ProtocolError {
                code: 19,
                message: "constraint violation".to_string()
            }
        );
    }

    #[test]
    fn io_failure_is_connect_error() {
        let err = map_ldap_error(
            "ldap://localhost:389",
            LdapError::Io {
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            },
        );
        assert!(matches!(
            err,
            Error::ConnectError { endpoint, .. } if endpoint == "ldap://localhost:389"
        ));
    }

    #[test]
    fn search_entries_keep_text_attributes_only() {
        let entry = SearchEntry {
            dn: "uid=bob,ou=People,dc=example,dc=com".to_string(),
            attrs: [("cn".to_string(), vec!["Bob".to_string()])]
                .into_iter()
                .collect(),
            bin_attrs: [("jpegPhoto".to_string(), vec![vec![0xff, 0xd8]])]
                .into_iter()
                .collect(),
        };

        let entry = text_entry(entry);
        assert_eq!(entry.path, "uid=bob,ou=People,dc=example,dc=com");
        assert_eq!(entry.first("cn"), Some("Bob"));
        assert!(entry.values("jpegPhoto").is_none());
    }

    #[test]
    fn value_sets_drop_duplicates() {
        let set = value_set(&["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn open_rejects_invalid_host() {
        let config = ConnectionConfig::new("broken", "not a host");
        let result = LdapConnector::new().open(&config).await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
