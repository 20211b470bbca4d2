//! Background coordinator — reacts to install, tab-update, message,
//! storage-change and timer events. Holds no state of its own.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use inlink_core::store::{load_credential, load_extraction};
use inlink_core::types::{keys, now_millis};
use inlink_core::{
    Error, ExtensionConfig, Message, MessageBus, MessageHandler, Response, Result, SharedStore,
    StorageChange, Subscription, Tab, TabHost, TabId,
};
use inlink_scrape::identity::is_matching_site;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Page opened on first install.
pub const ONBOARDING_PAGE: &str = "chrome-extension://inlink/popup.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    Loading,
    Complete,
}

pub struct BackgroundCoordinator {
    config: ExtensionConfig,
    store: Arc<dyn SharedStore>,
    bus: Arc<dyn MessageBus>,
    tabs: Arc<dyn TabHost>,
}

impl BackgroundCoordinator {
    pub fn new(
        config: ExtensionConfig,
        store: Arc<dyn SharedStore>,
        bus: Arc<dyn MessageBus>,
        tabs: Arc<dyn TabHost>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            bus,
            tabs,
        })
    }

    /// Register the message handler and spawn the storage relay and the
    /// periodic sweep. Everything stops when the handle is dropped.
    pub fn start(self: &Arc<Self>) -> BackgroundHandle {
        let subscription = self
            .bus
            .on_runtime_message(Arc::new(RuntimeListener(Arc::downgrade(self))));

        // Subscribe before spawning so no change slips past.
        let mut changes = self.store.subscribe();
        let relay = {
            let coordinator = Arc::downgrade(self);
            tokio::spawn(async move {
                loop {
                    let event = changes.recv().await;
                    let Some(this) = coordinator.upgrade() else {
                        break;
                    };
                    match event {
                        Ok(change) => this.on_storage_change(&change).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Storage relay lagged by {} changes, resyncing tabs", missed);
                            this.resync_auth().await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let sweeper = {
            let coordinator = Arc::downgrade(self);
            let period = self.config.sweep_interval();
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let Some(this) = coordinator.upgrade() else {
                        break;
                    };
                    if let Err(e) = this.sweep().await {
                        error!("Cleanup error: {}", e);
                    }
                }
            })
        };

        info!("Background coordinator started");
        BackgroundHandle {
            tasks: vec![relay, sweeper],
            _subscription: subscription,
        }
    }

    // ---------------------------------------------------------------
    // Lifecycle events
    // ---------------------------------------------------------------

    pub async fn on_installed(&self, reason: InstallReason) {
        match reason {
            InstallReason::Install => {
                info!("Extension installed");
                if let Err(e) = self.tabs.open(ONBOARDING_PAGE).await {
                    warn!("Failed to open onboarding page: {}", e);
                }
            }
            InstallReason::Update => info!("Extension updated"),
            InstallReason::BrowserUpdate => debug!("Browser updated"),
        }
    }

    /// Make sure a signed-in user's matching tab has a content agent.
    pub async fn on_tab_updated(&self, tab: &Tab, status: TabStatus) {
        if status != TabStatus::Complete || !is_matching_site(&tab.url, &self.config.site_domain) {
            return;
        }

        match load_credential(self.store.as_ref()).await {
            Ok(Some(_)) => match self.tabs.inject_content_agent(tab.id).await {
                Ok(()) => debug!("Content agent injected into tab {}", tab.id),
                Err(Error::AlreadyInjected(_)) => {}
                Err(e) => debug!("Injection into tab {} skipped: {}", tab.id, e),
            },
            Ok(None) => {}
            Err(e) => error!("Site page check error: {}", e),
        }
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    /// Answer a runtime message. Broadcast-only actions get no response.
    pub async fn handle(&self, message: Message) -> Option<Response> {
        match self.dispatch(message).await {
            Ok(response) => response,
            Err(e) => {
                error!("Background message handler error: {}", e);
                Some(Response::error(e.to_string()))
            }
        }
    }

    async fn dispatch(&self, message: Message) -> Result<Option<Response>> {
        let response = match message {
            Message::GetAuthStatus => {
                let credential = load_credential(self.store.as_ref()).await?;
                Response::AuthStatus {
                    is_authenticated: credential.is_some(),
                    user_email: credential.and_then(|c| c.email),
                }
            }
            Message::ClearAuth => {
                self.store.clear().await?;
                Response::ok()
            }
            notify @ Message::NotifyExtraction { .. } => {
                self.broadcast(notify).await;
                Response::ok()
            }
            Message::OpenDashboard => {
                self.tabs.open(&self.config.dashboard_url).await?;
                Response::ok()
            }
            Message::AuthStatusChanged { .. }
            | Message::ExtractionStarted
            | Message::ExtractionCompleted { .. }
            | Message::TriggerExtraction => return Ok(None),
            Message::Unknown => Response::error("Unknown action"),
        };
        Ok(Some(response))
    }

    /// Send `message` to every matching tab. Returns how many tabs received it.
    pub async fn broadcast(&self, message: Message) -> usize {
        let tabs = match self.tabs.query(&self.config.site_patterns()).await {
            Ok(tabs) => tabs,
            Err(e) => {
                error!("Failed to notify site tabs: {}", e);
                return 0;
            }
        };

        let sends = tabs
            .iter()
            .map(|tab| self.bus.send_to_tab(tab.id, message.clone()));
        // A tab without a content agent is the normal case.
        let delivered = join_all(sends)
            .await
            .into_iter()
            .filter(|sent| sent.is_ok())
            .count();
        debug!("{} delivered to {} tabs", message.action(), delivered);
        delivered
    }

    pub async fn on_storage_change(&self, change: &StorageChange) {
        if let Some(token) = change.get(keys::AUTH_TOKEN) {
            let is_authenticated = token
                .new_value
                .as_ref()
                .and_then(|v| v.as_str())
                .is_some_and(|t| !t.is_empty());
            self.broadcast(Message::AuthStatusChanged {
                is_authenticated,
                auth_token: None,
            })
            .await;
        }
    }

    async fn resync_auth(&self) {
        match load_credential(self.store.as_ref()).await {
            Ok(credential) => {
                self.broadcast(Message::AuthStatusChanged {
                    is_authenticated: credential.is_some(),
                    auth_token: None,
                })
                .await;
            }
            Err(e) => error!("Auth resync failed: {}", e),
        }
    }

    /// Ask the content agent in `tab` to extract (context-menu entry point).
    pub async fn trigger_extraction(&self, tab: TabId) {
        if let Err(e) = self.bus.send_to_tab(tab, Message::TriggerExtraction).await {
            error!("Failed to trigger extraction in tab {}: {}", tab, e);
        }
    }

    // ---------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------

    pub async fn sweep(&self) -> Result<bool> {
        self.sweep_at(now_millis()).await
    }

    /// Drop the extraction record if it has outlived the retention window.
    pub async fn sweep_at(&self, now_ms: i64) -> Result<bool> {
        let record = load_extraction(self.store.as_ref()).await?;
        if !record.is_stale(now_ms, self.config.retention()) {
            return Ok(false);
        }
        self.store.remove(keys::EXTRACTION_FIELDS).await?;
        info!("Cleared stale extraction record");
        Ok(true)
    }
}

/// Keeps the coordinator's listener and tasks alive.
pub struct BackgroundHandle {
    tasks: Vec<JoinHandle<()>>,
    _subscription: Subscription,
}

impl BackgroundHandle {
    pub fn shutdown(self) {}
}

impl Drop for BackgroundHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct RuntimeListener(Weak<BackgroundCoordinator>);

#[async_trait]
impl MessageHandler for RuntimeListener {
    async fn on_message(&self, message: Message) -> Option<Response> {
        let coordinator = self.0.upgrade()?;
        coordinator.handle(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlink_core::store::{record_extraction_completed, save_credential};
    use inlink_core::{LocalBrowser, MemoryStore, ProfileData, SessionCredential};

    fn setup() -> (Arc<BackgroundCoordinator>, Arc<MemoryStore>, LocalBrowser) {
        let store = Arc::new(MemoryStore::new());
        let browser = LocalBrowser::new();
        let coordinator = BackgroundCoordinator::new(
            ExtensionConfig::default(),
            store.clone(),
            Arc::new(browser.clone()),
            Arc::new(browser.clone()),
        );
        (coordinator, store, browser)
    }

    async fn sign_in(store: &MemoryStore) {
        save_credential(
            store,
            &SessionCredential {
                token: "T".into(),
                email: Some("a@b.com".into()),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_get_auth_status() {
        let (coordinator, store, _) = setup();
        assert_eq!(
            coordinator.handle(Message::GetAuthStatus).await,
            Some(Response::AuthStatus {
                is_authenticated: false,
                user_email: None
            })
        );

        sign_in(&store).await;
        assert_eq!(
            coordinator.handle(Message::GetAuthStatus).await,
            Some(Response::AuthStatus {
                is_authenticated: true,
                user_email: Some("a@b.com".into())
            })
        );
    }

    #[tokio::test]
    async fn test_clear_auth_and_unknown_action() {
        let (coordinator, store, _) = setup();
        sign_in(&store).await;

        assert_eq!(coordinator.handle(Message::ClearAuth).await, Some(Response::ok()));
        assert!(store.snapshot().is_empty());

        assert_eq!(
            coordinator.handle(Message::Unknown).await,
            Some(Response::error("Unknown action"))
        );
        assert_eq!(coordinator.handle(Message::ExtractionStarted).await, None);
    }

    #[tokio::test]
    async fn test_open_dashboard_and_install() {
        let (coordinator, _, browser) = setup();
        assert_eq!(coordinator.handle(Message::OpenDashboard).await, Some(Response::ok()));
        coordinator.on_installed(InstallReason::Update).await;
        coordinator.on_installed(InstallReason::Install).await;

        let urls: Vec<String> = browser.tabs().into_iter().map(|t| t.url).collect();
        assert_eq!(urls, vec!["http://localhost:5000/dashboard", ONBOARDING_PAGE]);
    }

    #[tokio::test]
    async fn test_tab_update_injects_only_when_signed_in() {
        let (coordinator, store, browser) = setup();
        let id = browser.add_tab("https://www.linkedin.com/in/ada/", true);
        let other = browser.add_tab("https://example.com/", false);
        let tab = browser.tab(id).unwrap();

        coordinator.on_tab_updated(&tab, TabStatus::Complete).await;
        assert!(browser.injected_tabs().is_empty());

        sign_in(&store).await;
        coordinator.on_tab_updated(&tab, TabStatus::Loading).await;
        assert!(browser.injected_tabs().is_empty());

        coordinator.on_tab_updated(&tab, TabStatus::Complete).await;
        // Second injection fails with AlreadyInjected and is swallowed
        coordinator.on_tab_updated(&tab, TabStatus::Complete).await;
        coordinator
            .on_tab_updated(&browser.tab(other).unwrap(), TabStatus::Complete)
            .await;
        assert_eq!(browser.injected_tabs().into_iter().collect::<Vec<_>>(), vec![id]);
    }

    #[tokio::test]
    async fn test_sweep_respects_retention() {
        let (coordinator, store, _) = setup();
        let data = ProfileData {
            full_name: Some("Ada".into()),
            ..Default::default()
        };
        record_extraction_completed(store.as_ref(), &data, 1_000).await.unwrap();

        assert!(!coordinator.sweep_at(1_000 + 3_599_000).await.unwrap());
        assert!(store.snapshot().contains_key(keys::EXTRACTED_DATA));

        assert!(coordinator.sweep_at(1_000 + 3_600_001).await.unwrap());
        let snapshot = store.snapshot();
        for key in keys::EXTRACTION_FIELDS {
            assert!(!snapshot.contains_key(*key));
        }
    }
}
