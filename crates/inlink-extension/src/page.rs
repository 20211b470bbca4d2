//! Page host — the document a content agent runs in, plus its overlay UI.

use std::time::Duration;

use async_trait::async_trait;
use inlink_core::{Result, TabId};
use parking_lot::RwLock;
use tokio::sync::broadcast;

/// Tone of a transient status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[async_trait]
pub trait PageHost: Send + Sync {
    fn tab_id(&self) -> TabId;

    /// Current address of the document.
    async fn location(&self) -> Result<String>;

    /// Serialized document markup.
    async fn document_html(&self) -> Result<String>;

    /// DOM mutation notifications (childList/subtree).
    fn mutations(&self) -> broadcast::Receiver<()>;

    /// Mount the floating affordance, replacing any existing one.
    async fn mount_affordance(&self) -> Result<()>;

    async fn unmount_affordance(&self) -> Result<()>;

    async fn show_status(&self, message: &str, kind: StatusKind) -> Result<()>;

    async fn hide_status(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Overlay {
    affordance: bool,
    mounts: usize,
    status: Option<(String, StatusKind)>,
    history: Vec<(String, StatusKind)>,
}

/// In-process page whose overlay state can be inspected.
pub struct LocalPage {
    tab: TabId,
    url: RwLock<String>,
    html: RwLock<String>,
    document_delay: RwLock<Option<Duration>>,
    overlay: RwLock<Overlay>,
    mutations: broadcast::Sender<()>,
}

impl LocalPage {
    pub fn new(tab: TabId, url: &str, html: &str) -> Self {
        let (mutations, _) = broadcast::channel(64);
        Self {
            tab,
            url: RwLock::new(url.to_string()),
            html: RwLock::new(html.to_string()),
            document_delay: RwLock::new(None),
            overlay: RwLock::new(Overlay::default()),
            mutations,
        }
    }

    /// In-app navigation: swap address and markup, then report a mutation.
    pub fn navigate(&self, url: &str, html: &str) {
        *self.url.write() = url.to_string();
        *self.html.write() = html.to_string();
        let _ = self.mutations.send(());
    }

    pub fn set_html(&self, html: &str) {
        *self.html.write() = html.to_string();
        let _ = self.mutations.send(());
    }

    /// Make document reads slow, to simulate a page that never settles.
    pub fn set_document_delay(&self, delay: Option<Duration>) {
        *self.document_delay.write() = delay;
    }

    pub fn affordance_visible(&self) -> bool {
        self.overlay.read().affordance
    }

    /// Total mounts so far, including replacements.
    pub fn mount_count(&self) -> usize {
        self.overlay.read().mounts
    }

    pub fn status(&self) -> Option<(String, StatusKind)> {
        self.overlay.read().status.clone()
    }

    pub fn status_history(&self) -> Vec<(String, StatusKind)> {
        self.overlay.read().history.clone()
    }
}

#[async_trait]
impl PageHost for LocalPage {
    fn tab_id(&self) -> TabId {
        self.tab
    }

    async fn location(&self) -> Result<String> {
        Ok(self.url.read().clone())
    }

    async fn document_html(&self) -> Result<String> {
        let delay = *self.document_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.html.read().clone())
    }

    fn mutations(&self) -> broadcast::Receiver<()> {
        self.mutations.subscribe()
    }

    async fn mount_affordance(&self) -> Result<()> {
        let mut overlay = self.overlay.write();
        overlay.affordance = true;
        overlay.mounts += 1;
        Ok(())
    }

    async fn unmount_affordance(&self) -> Result<()> {
        self.overlay.write().affordance = false;
        Ok(())
    }

    async fn show_status(&self, message: &str, kind: StatusKind) -> Result<()> {
        let mut overlay = self.overlay.write();
        overlay.status = Some((message.to_string(), kind));
        overlay.history.push((message.to_string(), kind));
        Ok(())
    }

    async fn hide_status(&self) -> Result<()> {
        self.overlay.write().status = None;
        Ok(())
    }
}
