//! Connection registry, sessions and lazy tree cache for directory services.
//!
//! The network side is reached only through [`DirectoryConnector`] and [`DirectoryClient`];
//! [`LdapConnector`] implements them on top of `ldap3`. Every operation is `async` and holds
//! the session lock for the full round-trip. There is no cancellation and no timeout beyond
//! the connection timeout of the configuration and whatever the client enforces itself.

#![deny(missing_docs)]

mod client;
mod dn;
mod registry;
mod session;
mod store;
mod tree;

pub use client::{
    DirectoryClient, DirectoryConnector, LdapConnector, SearchScope, ALL_USER_ATTRIBUTES,
    MATCH_ALL_FILTER,
};
pub use dn::{
    leaf_value, parent_path, path_key, same_path, DistinguishedName, DistinguishedNameError,
    RelativeDistinguishedName,
};
pub use registry::ConnectionRegistry;
pub use session::{ConnectionSession, SessionGuard, SessionStatus};
pub use store::{ConfigStore, InMemoryConfigStore};
pub use tree::{
    display_name, expand, invalidate, load_root, reset_all, DirectoryNode, DirectoryTreeCache,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirbrowse_core::Result<T>;
