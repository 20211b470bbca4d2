//! Message bus and tab host shared by the extension contexts.
//!
//! Delivery is at-most-once with no ordering across channels. Sending to a
//! target with no listener fails with `Error::NoReceiver`, which callers are
//! expected to swallow: absent listeners are the normal case.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::types::ProfileData;

pub type TabId = u32;

/// Messages exchanged between contexts, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    GetAuthStatus,
    ClearAuth,
    NotifyExtraction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ProfileData>,
    },
    OpenDashboard,
    AuthStatusChanged {
        #[serde(rename = "isAuthenticated")]
        is_authenticated: bool,
        #[serde(rename = "authToken", default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    ExtractionStarted,
    ExtractionCompleted {
        data: ProfileData,
    },
    TriggerExtraction,
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Self::GetAuthStatus => "getAuthStatus",
            Self::ClearAuth => "clearAuth",
            Self::NotifyExtraction { .. } => "notifyExtraction",
            Self::OpenDashboard => "openDashboard",
            Self::AuthStatusChanged { .. } => "authStatusChanged",
            Self::ExtractionStarted => "extractionStarted",
            Self::ExtractionCompleted { .. } => "extractionCompleted",
            Self::TriggerExtraction => "triggerExtraction",
            Self::Unknown => "unknown",
        }
    }
}

/// Reply to a request-shaped message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    AuthStatus {
        #[serde(rename = "isAuthenticated")]
        is_authenticated: bool,
        #[serde(rename = "userEmail")]
        user_email: Option<String>,
    },
    Success {
        success: bool,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn ok() -> Self {
        Self::Success { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Receiver side of the bus. Returning `Some` answers a request.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: Message) -> Option<Response>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Send to extension pages (background, popup). The first response wins.
    async fn send_runtime(&self, message: Message) -> Result<Option<Response>>;

    /// Send to the listeners of a single tab.
    async fn send_to_tab(&self, tab: TabId, message: Message) -> Result<Option<Response>>;

    fn on_runtime_message(&self, handler: Arc<dyn MessageHandler>) -> Subscription;

    fn on_tab_message(&self, tab: TabId, handler: Arc<dyn MessageHandler>) -> Subscription;
}

/// A browser tab as seen by the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tab {
    pub id: TabId,
    pub url: String,
    pub active: bool,
}

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Tabs whose URL matches any of the patterns (`*` wildcards).
    async fn query(&self, url_patterns: &[String]) -> Result<Vec<Tab>>;

    async fn active_tab(&self) -> Result<Option<Tab>>;

    /// Open a new, active tab.
    async fn open(&self, url: &str) -> Result<TabId>;

    /// Inject the content agent. Fails with `AlreadyInjected` if present.
    async fn inject_content_agent(&self, tab: TabId) -> Result<()>;
}

/// Cancellable registration handle. Dropping it unregisters the listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Match a URL against a `scheme://host/path` pattern.
///
/// The scheme is compared exactly. A host of `*.domain` matches the domain
/// itself and any subdomain. In the path, `*` matches any run of characters.
/// Unparseable URLs never match.
pub fn url_matches(pattern: &str, address: &str) -> bool {
    let Some((scheme, rest)) = pattern.split_once("://") else {
        return false;
    };
    let (host, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, "/"),
    };
    let Ok(url) = Url::parse(address) else {
        return false;
    };
    if url.scheme() != scheme {
        return false;
    }
    let Some(actual_host) = url.host_str() else {
        return false;
    };
    let host_ok = match host.strip_prefix("*.") {
        Some(domain) => {
            actual_host == domain
                || actual_host
                    .strip_suffix(domain)
                    .is_some_and(|sub| sub.ends_with('.'))
        }
        None => host == "*" || actual_host == host,
    };
    if !host_ok {
        return false;
    }

    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    glob_matches(path, &target)
}

/// Glob match with `*` as "any run of characters".
fn glob_matches(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(head) = parts.next() else {
        return false;
    };
    let Some(mut rest) = text.strip_prefix(head) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard: exact match
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

// ---------------------------------------------------------------
// In-process browser
// ---------------------------------------------------------------

type Listeners = Vec<(u64, Arc<dyn MessageHandler>)>;
type Injector = Arc<dyn Fn(TabId) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_listener: AtomicU64,
    next_tab: AtomicU32,
    tabs: RwLock<BTreeMap<TabId, Tab>>,
    runtime: RwLock<Listeners>,
    tab_listeners: RwLock<HashMap<TabId, Listeners>>,
    injected: RwLock<HashSet<TabId>>,
    injector: RwLock<Option<Injector>>,
}

/// In-process tab host and message bus.
#[derive(Clone, Default)]
pub struct LocalBrowser {
    inner: Arc<Registry>,
}

impl LocalBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tab. An active tab deactivates the others.
    pub fn add_tab(&self, url: &str, active: bool) -> TabId {
        let id = self.inner.next_tab.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tabs = self.inner.tabs.write();
        if active {
            tabs.values_mut().for_each(|t| t.active = false);
        }
        tabs.insert(
            id,
            Tab {
                id,
                url: url.to_string(),
                active,
            },
        );
        id
    }

    pub fn navigate(&self, tab: TabId, url: &str) -> Result<()> {
        let mut tabs = self.inner.tabs.write();
        let entry = tabs.get_mut(&tab).ok_or(Error::TabNotFound(tab))?;
        entry.url = url.to_string();
        Ok(())
    }

    pub fn close_tab(&self, tab: TabId) {
        self.inner.tabs.write().remove(&tab);
        self.inner.tab_listeners.write().remove(&tab);
        self.inner.injected.write().remove(&tab);
    }

    pub fn tab(&self, tab: TabId) -> Option<Tab> {
        self.inner.tabs.read().get(&tab).cloned()
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.inner.tabs.read().values().cloned().collect()
    }

    /// Hook invoked when the content agent is injected into a tab.
    pub fn set_injector(&self, injector: impl Fn(TabId) -> Result<()> + Send + Sync + 'static) {
        *self.inner.injector.write() = Some(Arc::new(injector));
    }

    pub fn injected_tabs(&self) -> HashSet<TabId> {
        self.inner.injected.read().clone()
    }

    pub fn tab_listener_count(&self, tab: TabId) -> usize {
        self.inner
            .tab_listeners
            .read()
            .get(&tab)
            .map_or(0, |l| l.len())
    }

    fn next_listener_id(&self) -> u64 {
        self.inner.next_listener.fetch_add(1, Ordering::SeqCst)
    }
}

async fn dispatch(listeners: Listeners, message: Message) -> Result<Option<Response>> {
    if listeners.is_empty() {
        return Err(Error::NoReceiver);
    }
    let mut response = None;
    for (_, handler) in listeners {
        let reply = handler.on_message(message.clone()).await;
        if response.is_none() {
            response = reply;
        }
    }
    Ok(response)
}

#[async_trait]
impl MessageBus for LocalBrowser {
    async fn send_runtime(&self, message: Message) -> Result<Option<Response>> {
        let listeners = self.inner.runtime.read().clone();
        debug!("runtime <- {}", message.action());
        dispatch(listeners, message).await
    }

    async fn send_to_tab(&self, tab: TabId, message: Message) -> Result<Option<Response>> {
        let listeners = self
            .inner
            .tab_listeners
            .read()
            .get(&tab)
            .cloned()
            .unwrap_or_default();
        debug!("tab {} <- {}", tab, message.action());
        dispatch(listeners, message).await
    }

    fn on_runtime_message(&self, handler: Arc<dyn MessageHandler>) -> Subscription {
        let id = self.next_listener_id();
        self.inner.runtime.write().push((id, handler));
        let registry: Weak<Registry> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.runtime.write().retain(|(lid, _)| *lid != id);
            }
        })
    }

    fn on_tab_message(&self, tab: TabId, handler: Arc<dyn MessageHandler>) -> Subscription {
        let id = self.next_listener_id();
        self.inner
            .tab_listeners
            .write()
            .entry(tab)
            .or_default()
            .push((id, handler));
        let registry: Weak<Registry> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                let mut listeners = registry.tab_listeners.write();
                if let Some(list) = listeners.get_mut(&tab) {
                    list.retain(|(lid, _)| *lid != id);
                    if list.is_empty() {
                        listeners.remove(&tab);
                    }
                }
            }
        })
    }
}

#[async_trait]
impl TabHost for LocalBrowser {
    async fn query(&self, url_patterns: &[String]) -> Result<Vec<Tab>> {
        Ok(self
            .inner
            .tabs
            .read()
            .values()
            .filter(|t| url_patterns.iter().any(|p| url_matches(p, &t.url)))
            .cloned()
            .collect())
    }

    async fn active_tab(&self) -> Result<Option<Tab>> {
        Ok(self.inner.tabs.read().values().find(|t| t.active).cloned())
    }

    async fn open(&self, url: &str) -> Result<TabId> {
        Ok(self.add_tab(url, true))
    }

    async fn inject_content_agent(&self, tab: TabId) -> Result<()> {
        if !self.inner.tabs.read().contains_key(&tab) {
            return Err(Error::TabNotFound(tab));
        }
        let listening = self.tab_listener_count(tab) > 0;
        if listening || !self.inner.injected.write().insert(tab) {
            return Err(Error::AlreadyInjected(tab));
        }
        let injector = self.inner.injector.read().clone();
        match injector {
            Some(inject) => inject(tab),
            None => Ok(()),
        }
    }
}
