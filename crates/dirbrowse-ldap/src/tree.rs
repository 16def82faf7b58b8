//! Lazy directory tree.
//!
//! Nodes own their children by value and are addressed by path. A node fetches its children
//! at most once until it is invalidated; a failed fetch leaves it untouched so the caller can
//! retry.

use crate::dn::{self, path_key};
use crate::session::ConnectionSession;
use crate::Result;
use dirbrowse_core::entry::first_value;
use dirbrowse_core::{AttributeChangeSet, Attributes, DirectoryEntry, Error};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Attributes tried, in order, for a node's display name.
const DISPLAY_ATTRIBUTES: [&str; 3] = ["cn", "ou", "uid"];

/// One cached entry and, once loaded, its direct children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryNode {
    path: String,
    attributes: Attributes,
    children_loaded: bool,
    children: Vec<DirectoryNode>,
}

impl DirectoryNode {
    /// Creates an unexpanded node.
    #[must_use]
    pub fn new(path: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            path: path.into(),
            attributes,
            children_loaded: false,
            children: Vec::new(),
        }
    }

    /// Creates an unexpanded node from a search result.
    #[must_use]
    pub fn from_entry(entry: DirectoryEntry) -> Self {
        Self::new(entry.path, entry.attributes)
    }

    /// Path of the entry.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attribute snapshot.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// True once the children have been fetched.
    #[must_use]
    pub const fn children_loaded(&self) -> bool {
        self.children_loaded
    }

    /// Children in the order the service returned them. Empty until loaded.
    #[must_use]
    pub fn children(&self) -> &[DirectoryNode] {
        &self.children
    }

    /// Label for presentation, see [`display_name`].
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(&self.path, &self.attributes)
    }

    /// Finds the node for `path` in this subtree.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&DirectoryNode> {
        self.find_by_key(&path_key(path))
    }

    /// Finds the node for `path` in this subtree, mutably.
    pub fn find_mut(&mut self, path: &str) -> Option<&mut DirectoryNode> {
        self.find_by_key_mut(&path_key(path))
    }

    /// Discards the children and marks them as not loaded.
    pub fn invalidate(&mut self) {
        self.children.clear();
        self.children_loaded = false;
    }

    fn find_by_key(&self, key: &str) -> Option<&DirectoryNode> {
        if path_key(&self.path) == key {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_key(key))
    }

    fn find_by_key_mut(&mut self, key: &str) -> Option<&mut DirectoryNode> {
        if path_key(&self.path) == key {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_key_mut(key))
    }

    fn remove_descendant(&mut self, key: &str) -> Option<DirectoryNode> {
        if let Some(index) = self
            .children
            .iter()
            .position(|child| path_key(&child.path) == key)
        {
            return Some(self.children.remove(index));
        }
        self.children
            .iter_mut()
            .find_map(|child| child.remove_descendant(key))
    }
}

/// Display name for an entry.
///
/// The first value of `cn`, `ou` or `uid`, in that order. Otherwise the value of the leaf
/// component of `path`, and failing that `path` itself.
#[must_use]
pub fn display_name(path: &str, attributes: &Attributes) -> String {
    DISPLAY_ATTRIBUTES
        .iter()
        .find_map(|attribute| first_value(attributes, attribute))
        .map(str::to_string)
        .or_else(|| dn::leaf_value(path))
        .unwrap_or_else(|| path.to_string())
}

/// Fetches the first level below `base_root` (empty for the service's top-level root).
///
/// The returned root has no attributes of its own. Its children are unexpanded.
///
/// # Errors
///
/// Returns [`Error::NotConnected`] if the session is not connected or its transport no
/// longer reports alive, or [`Error::FetchError`] if the search fails.
pub async fn load_root(session: &ConnectionSession, base_root: &str) -> Result<DirectoryNode> {
    if !session.is_connected() {
        return Err(Error::NotConnected(session.name().to_string()));
    }
    let mut root = DirectoryNode::new(base_root, Attributes::new());
    expand(&mut root, session).await?;
    Ok(root)
}

/// Fetches the children of `node` unless they are already loaded.
///
/// # Errors
///
/// Returns [`Error::FetchError`] if the search fails, or [`Error::NotConnected`] if the
/// session has no live handle. The node is unchanged on failure.
pub async fn expand<'a>(
    node: &'a mut DirectoryNode,
    session: &ConnectionSession,
) -> Result<&'a [DirectoryNode]> {
    if !node.children_loaded {
        let entries = session
            .children(&node.path)
            .await
            .map_err(|err| fetch_failure(&node.path, err))?;
        node.children = entries.into_iter().map(DirectoryNode::from_entry).collect();
        node.children_loaded = true;
        debug!(path = %node.path, count = node.children.len(), "expanded node");
    }
    Ok(&node.children)
}

/// Discards the children of `node`.
pub fn invalidate(node: &mut DirectoryNode) {
    node.invalidate();
}

/// Discards everything below `root`.
pub fn reset_all(root: &mut DirectoryNode) {
    root.invalidate();
}

fn fetch_failure(path: &str, err: Error) -> Error {
    match err {
        Error::NotConnected(_) => err,
        other => Error::fetch(path, other),
    }
}

/// The tree of one session, rooted at the session's configured base root.
///
/// Mutating operations take `&mut self`, so one cache never runs two fetches for the same
/// node at once. The cache remembers the session epoch it was loaded under; after a
/// reconnect the whole tree is reset before the next mutating operation. [`Self::root`] and
/// [`Self::find`] read the last synchronized state, see [`Self::is_stale`].
#[derive(Debug)]
pub struct DirectoryTreeCache {
    session: Arc<ConnectionSession>,
    root: Option<DirectoryNode>,
    epoch: u64,
}

impl DirectoryTreeCache {
    /// Creates an empty cache for `session`.
    #[must_use]
    pub fn new(session: Arc<ConnectionSession>) -> Self {
        let epoch = session.epoch();
        Self {
            session,
            root: None,
            epoch,
        }
    }

    /// Session backing this cache.
    #[must_use]
    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    /// Loads (or reloads) the root from the session's base root.
    ///
    /// # Errors
    ///
    /// See [`load_root`]. A failed reload keeps the previous tree.
    pub async fn load(&mut self) -> Result<&DirectoryNode> {
        let epoch = self.session.epoch();
        let root = load_root(&self.session, self.session.config().base_root()).await?;
        self.epoch = epoch;
        Ok(&*self.root.insert(root))
    }

    /// Loaded root, if any.
    #[must_use]
    pub fn root(&self) -> Option<&DirectoryNode> {
        self.root.as_ref()
    }

    /// Cached node for `path`.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&DirectoryNode> {
        self.root.as_ref().and_then(|root| root.find(path))
    }

    /// True if the session reconnected since the tree was loaded.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.root.is_some() && self.session.epoch() != self.epoch
    }

    /// Fetches the children of the cached node at `path` if not yet loaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `path` is not cached, otherwise see [`expand`].
    pub async fn expand_path(&mut self, path: &str) -> Result<&[DirectoryNode]> {
        self.sync_epoch();
        let node = self
            .root
            .as_mut()
            .and_then(|root| root.find_mut(path))
            .ok_or_else(|| Error::UnknownNode(path.to_string()))?;
        expand(node, &self.session).await
    }

    /// Discards the cached children of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `path` is not cached.
    pub fn invalidate_path(&mut self, path: &str) -> Result<()> {
        self.sync_epoch();
        self.node_mut(path)?.invalidate();
        Ok(())
    }

    /// Invalidates `path` and fetches its children again.
    ///
    /// # Errors
    ///
    /// As [`Self::expand_path`]. The node stays invalidated if the fetch fails.
    pub async fn refresh(&mut self, path: &str) -> Result<&[DirectoryNode]> {
        self.invalidate_path(path)?;
        self.expand_path(path).await
    }

    /// Discards everything below the root.
    pub fn reset(&mut self) {
        if let Some(root) = self.root.as_mut() {
            reset_all(root);
        }
        self.epoch = self.session.epoch();
    }

    /// Submits the difference between the cached snapshot of `path` and `modified`, then
    /// updates the snapshot. Returns the submitted changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNode`] if `path` is not cached, or the session's error. The
    /// cached snapshot is unchanged on failure.
    pub async fn submit_edit(
        &mut self,
        path: &str,
        modified: &Attributes,
    ) -> Result<AttributeChangeSet> {
        self.sync_epoch();
        let node = self
            .root
            .as_mut()
            .and_then(|root| root.find_mut(path))
            .ok_or_else(|| Error::UnknownNode(path.to_string()))?;
        let changes = self
            .session
            .apply_edit(path, &node.attributes, modified)
            .await?;
        node.attributes = changes.apply_to(&node.attributes);
        Ok(changes)
    }

    /// Creates an entry and, if its parent's children are loaded, adds it to the tree.
    ///
    /// # Errors
    ///
    /// Returns the session's error. The tree is unchanged on failure.
    pub async fn create_entry(&mut self, path: &str, attributes: Attributes) -> Result<()> {
        self.sync_epoch();
        self.session.add(path, &attributes).await?;

        let parent = dn::parent_path(path).unwrap_or_default();
        if let Some(parent) = self.root.as_mut().and_then(|root| root.find_mut(&parent)) {
            if parent.children_loaded {
                let key = path_key(path);
                parent.children.retain(|child| path_key(&child.path) != key);
                parent.children.push(DirectoryNode::new(path, attributes));
            }
        }
        Ok(())
    }

    /// Deletes an entry and drops its cached node.
    ///
    /// # Errors
    ///
    /// Returns the session's error. The tree is unchanged on failure.
    pub async fn delete_entry(&mut self, path: &str) -> Result<()> {
        self.sync_epoch();
        self.session.delete(path).await?;

        let key = path_key(path);
        if self
            .root
            .as_ref()
            .is_some_and(|root| path_key(&root.path) == key)
        {
            self.root = None;
        } else if let Some(root) = self.root.as_mut() {
            root.remove_descendant(&key);
        }
        Ok(())
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut DirectoryNode> {
        self.root
            .as_mut()
            .and_then(|root| root.find_mut(path))
            .ok_or_else(|| Error::UnknownNode(path.to_string()))
    }

    fn sync_epoch(&mut self) {
        let current = self.session.epoch();
        if current == self.epoch {
            return;
        }
        if let Some(root) = self.root.as_mut() {
            reset_all(root);
            debug!(
                connection = %self.session.name(),
                epoch = current,
                "session reconnected, tree reset"
            );
        }
        self.epoch = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockDirectoryClient, MockDirectoryConnector, SearchScope};
    use dirbrowse_core::{attributes, ConnectionConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "dc=example,dc=com";
    const PEOPLE: &str = "ou=People,dc=example,dc=com";
    const BOB: &str = "uid=bob,ou=People,dc=example,dc=com";

    fn directory(base: &str) -> Result<Vec<DirectoryEntry>> {
        let entries = match base {
            BASE => vec![
                DirectoryEntry::new(PEOPLE, attributes([("ou", vec!["People"])])),
                DirectoryEntry::new(
                    "ou=Groups,dc=example,dc=com",
                    attributes([("ou", vec!["Groups"])]),
                ),
            ],
            PEOPLE => vec![DirectoryEntry::new(
                BOB,
                attributes([("cn", vec!["Bob"]), ("uid", vec!["bob"])]),
            )],
            _ => Vec::new(),
        };
        Ok(entries)
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("corp", "ldap.example.com").with_base_root(BASE)
    }

    /// Client serving [`directory`], counting one-level searches.
    fn counting_client(searches: Arc<AtomicUsize>) -> MockDirectoryClient {
        let mut client = MockDirectoryClient::new();
        client.expect_is_alive().returning(|| true);
        client.expect_close().returning(|| Ok(()));
        client
            .expect_search()
            .withf(|_, scope, _, _| *scope == SearchScope::OneLevel)
            .returning(move |base, _, _, _| {
                searches.fetch_add(1, Ordering::SeqCst);
                directory(base)
            });
        client
    }

    async fn connected(client: MockDirectoryClient) -> Arc<ConnectionSession> {
        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_open()
            .times(1)
            .return_once(move |_| Ok(Box::new(client)));
        let session = Arc::new(ConnectionSession::new(config(), Arc::new(connector)));
        session.connect().await.unwrap();
        session
    }

    #[test]
    fn display_name_priority() {
        assert_eq!(
            display_name("", &attributes([("cn", vec!["Alice"]), ("ou", vec!["Eng"])])),
            "Alice"
        );
        assert_eq!(display_name("", &attributes([("ou", vec!["Eng"])])), "Eng");
        assert_eq!(
            display_name("", &attributes([("uid", vec!["bob"]), ("mail", vec!["b@x"])])),
            "bob"
        );
        assert_eq!(display_name("uid=bob,ou=People", &Attributes::new()), "bob");
        assert_eq!(display_name("", &Attributes::new()), "");
        assert_eq!(display_name("not a name", &Attributes::new()), "not a name");
    }

    #[test]
    fn display_name_reads_first_component_only() {
        let none = Attributes::new();
        assert_eq!(display_name("uid=bob,ou=People,", &none), "bob");
        assert_eq!(display_name("uid=bob,People", &none), "bob");
        assert_eq!(display_name("uid=bob,ou=", &none), "bob");
        assert_eq!(display_name("People,dc=com", &none), "People,dc=com");
    }

    #[test]
    fn empty_value_list_falls_through() {
        let attrs = attributes([("cn", Vec::<String>::new()), ("ou", vec!["Eng".to_string()])]);
        assert_eq!(display_name("ou=Eng,dc=com", &attrs), "Eng");
    }

    #[test]
    fn find_ignores_case_and_spacing() {
        let mut root = DirectoryNode::new(BASE, Attributes::new());
        root.children_loaded = true;
        root.children.push(DirectoryNode::new(PEOPLE, Attributes::new()));

        assert!(root.find("OU=people, DC=Example,dc=com").is_some());
        assert!(root.find("ou=Nobody,dc=example,dc=com").is_none());

        root.find_mut(PEOPLE).unwrap().invalidate();
        invalidate(&mut root);
        assert!(!root.children_loaded());
        assert!(root.children().is_empty());
    }

    #[test]
    fn node_serializes_with_camel_case_fields() {
        let node = DirectoryNode::new(PEOPLE, attributes([("ou", vec!["People"])]));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["path"], PEOPLE);
        assert_eq!(json["childrenLoaded"], false);
        assert_eq!(json["attributes"]["ou"][0], "People");
    }

    #[tokio::test]
    async fn load_root_requires_connection() {
        let mut connector = MockDirectoryConnector::new();
        connector.expect_open().never();
        let session = ConnectionSession::new(config(), Arc::new(connector));

        let err = load_root(&session, BASE).await.unwrap_err();
        assert_eq!(err, Error::NotConnected("corp".to_string()));
    }

    #[tokio::test]
    async fn load_root_rejects_dropped_transport() {
        let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let mut client = MockDirectoryClient::new();
        client
            .expect_is_alive()
            .returning(move || flag.load(Ordering::SeqCst));
        client.expect_search().never();
        client.expect_close().returning(|| Ok(()));
        let session = connected(client).await;

        alive.store(false, Ordering::SeqCst);
        let err = load_root(&session, BASE).await.unwrap_err();
        assert_eq!(err, Error::NotConnected("corp".to_string()));
    }

    #[tokio::test]
    async fn load_root_returns_unexpanded_children() {
        let searches = Arc::new(AtomicUsize::new(0));
        let session = connected(counting_client(searches.clone())).await;

        let root = load_root(&session, BASE).await.unwrap();
        assert_eq!(root.path(), BASE);
        assert!(root.attributes().is_empty());
        assert!(root.children_loaded());
        assert_eq!(root.children().len(), 2);
        assert!(root.children().iter().all(|child| !child.children_loaded()));
        assert_eq!(root.children()[0].display_name(), "People");
        assert_eq!(searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expand_fetches_at_most_once() {
        let searches = Arc::new(AtomicUsize::new(0));
        let session = connected(counting_client(searches.clone())).await;

        let mut node = DirectoryNode::new(PEOPLE, Attributes::new());
        assert_eq!(expand(&mut node, &session).await.unwrap().len(), 1);
        assert_eq!(expand(&mut node, &session).await.unwrap().len(), 1);
        assert_eq!(searches.load(Ordering::SeqCst), 1);

        invalidate(&mut node);
        expand(&mut node, &session).await.unwrap();
        assert_eq!(searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_expand_leaves_node_and_allows_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut client = MockDirectoryClient::new();
        client.expect_is_alive().returning(|| true);
        client.expect_close().returning(|| Ok(()));
        let counter = attempts.clone();
        client.expect_search().returning(move |base, _, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::ProtocolError {
                    code: 51,
                    message: "busy".to_string(),
                })
            } else {
                directory(base)
            }
        });
        let session = connected(client).await;

        let mut node = DirectoryNode::new(PEOPLE, Attributes::new());
        let err = expand(&mut node, &session).await.unwrap_err();
        assert!(matches!(&err, Error::FetchError { path, .. } if path == PEOPLE));
        assert_eq!(err.result_code(), Some(51));
        assert!(!node.children_loaded());
        assert!(node.children().is_empty());

        expand(&mut node, &session).await.unwrap();
        assert!(node.children_loaded());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_expands_by_path() {
        let searches = Arc::new(AtomicUsize::new(0));
        let session = connected(counting_client(searches.clone())).await;
        let mut cache = DirectoryTreeCache::new(session);

        assert!(matches!(
            cache.expand_path(PEOPLE).await,
            Err(Error::UnknownNode(_))
        ));

        cache.load().await.unwrap();
        let children = cache.expand_path("OU=People,DC=example,DC=com").await.unwrap();
        assert_eq!(children[0].path(), BOB);
        assert!(cache.find(BOB).is_some());

        cache.refresh(PEOPLE).await.unwrap();
        assert_eq!(searches.load(Ordering::SeqCst), 3);

        cache.invalidate_path(PEOPLE).unwrap();
        assert!(cache.find(BOB).is_none());
        assert!(matches!(
            cache.invalidate_path(BOB),
            Err(Error::UnknownNode(_))
        ));

        cache.reset();
        assert!(!cache.root().unwrap().children_loaded());
    }

    #[tokio::test]
    async fn reconnect_resets_tree() {
        let searches = Arc::new(AtomicUsize::new(0));
        let counter = searches.clone();
        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_open()
            .times(2)
            .returning(move |_| Ok(Box::new(counting_client(counter.clone()))));
        let session = Arc::new(ConnectionSession::new(config(), Arc::new(connector)));
        session.connect().await.unwrap();

        let mut cache = DirectoryTreeCache::new(Arc::clone(&session));
        cache.load().await.unwrap();
        cache.expand_path(PEOPLE).await.unwrap();
        assert!(!cache.is_stale());

        session.disconnect().await;
        session.connect().await.unwrap();
        assert!(cache.is_stale());

        // The stale tree is reset first, so the people node is gone.
        assert!(matches!(
            cache.expand_path(PEOPLE).await,
            Err(Error::UnknownNode(_))
        ));
        assert!(!cache.is_stale());
        assert!(!cache.root().unwrap().children_loaded());

        cache.expand_path(BASE).await.unwrap();
        cache.expand_path(PEOPLE).await.unwrap();
        assert_eq!(searches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn submit_edit_updates_snapshot_only_on_success() {
        let mut client = counting_client(Arc::new(AtomicUsize::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        client.expect_modify().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(Error::ProtocolError {
                    code: 19,
                    message: "constraint violation".to_string(),
                })
            }
        });
        let mut cache = DirectoryTreeCache::new(connected(client).await);
        cache.load().await.unwrap();
        cache.expand_path(PEOPLE).await.unwrap();

        let edited = attributes([("cn", vec!["Robert"]), ("uid", vec!["bob"])]);
        let changes = cache.submit_edit(BOB, &edited).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(cache.find(BOB).unwrap().attributes(), &edited);
        assert_eq!(cache.find(BOB).unwrap().display_name(), "Robert");

        let rejected = attributes([("uid", vec!["bob"])]);
        let err = cache.submit_edit(BOB, &rejected).await.unwrap_err();
        assert_eq!(err.result_code(), Some(19));
        assert_eq!(cache.find(BOB).unwrap().attributes(), &edited);
    }

    #[tokio::test]
    async fn create_and_delete_keep_tree_in_step() {
        let mut client = counting_client(Arc::new(AtomicUsize::new(0)));
        client.expect_add().returning(|_, _| Ok(()));
        client.expect_delete().returning(|path| {
            if path.starts_with("uid=ghost") {
                Err(Error::ProtocolError {
                    code: 32,
                    message: "no such object".to_string(),
                })
            } else {
                Ok(())
            }
        });
        let mut cache = DirectoryTreeCache::new(connected(client).await);
        cache.load().await.unwrap();
        cache.expand_path(PEOPLE).await.unwrap();

        let alice = "uid=alice,ou=People,dc=example,dc=com";
        cache
            .create_entry(alice, attributes([("uid", vec!["alice"])]))
            .await
            .unwrap();
        let people = cache.find(PEOPLE).unwrap();
        assert_eq!(people.children().len(), 2);
        assert!(!people.children()[1].children_loaded());

        // Parent not loaded: nothing to insert into.
        cache
            .create_entry(
                "cn=admins,ou=Groups,dc=example,dc=com",
                attributes([("cn", vec!["admins"])]),
            )
            .await
            .unwrap();
        assert!(cache.find("cn=admins,ou=Groups,dc=example,dc=com").is_none());

        cache.delete_entry(BOB).await.unwrap();
        assert!(cache.find(BOB).is_none());
        assert_eq!(cache.find(PEOPLE).unwrap().children().len(), 1);

        let before = cache.root().cloned();
        let err = cache
            .delete_entry("uid=ghost,ou=People,dc=example,dc=com")
            .await
            .unwrap_err();
        assert_eq!(err.result_code(), Some(32));
        assert_eq!(cache.root().cloned(), before);
    }
}
