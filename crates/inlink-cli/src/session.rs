//! One CLI invocation: a persistent store, an in-process browser and a
//! running background coordinator.

use std::path::Path;
use std::sync::Arc;

use inlink_api::{BackendClient, HttpBackend};
use inlink_core::store::load_extraction;
use inlink_core::{
    now_millis, DataPaths, ExtensionConfig, ExtractionRecord, LocalBrowser, MemoryStore, Message,
    MessageBus, Response,
};
use inlink_extension::{
    BackgroundCoordinator, BackgroundHandle, ContentAgent, ExtractionOutcome, InstallReason,
    LocalPage, PopupController, TabStatus,
};
use inlink_scrape::ProfileScraper;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub authenticated: bool,
    pub email: Option<String>,
    pub extraction: ExtractionRecord,
}

pub struct Session {
    pub config: ExtensionConfig,
    pub store: Arc<MemoryStore>,
    pub browser: LocalBrowser,
    pub backend: Arc<dyn BackendClient>,
    pub background: Arc<BackgroundCoordinator>,
    _handle: BackgroundHandle,
}

impl Session {
    /// Open the data directory and start the background coordinator against
    /// the configured backend. Must run inside a tokio runtime.
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let paths = DataPaths::new(data_dir)?;
        let config = ExtensionConfig::from_env(&paths);
        let first_run = !paths.store_file.exists();
        let store = Arc::new(MemoryStore::open(&paths.store_file));
        let backend = Arc::new(HttpBackend::new(&config.api_base_url));

        info!("Data directory: {}", paths.root.display());
        info!("Backend: {}", config.api_base_url);

        let session = Self::with_backend(config, store, backend);
        if first_run {
            session.background.on_installed(InstallReason::Install).await;
        }
        // The hourly sweep never fires in a short-lived process.
        if let Err(e) = session.background.sweep().await {
            warn!("Retention sweep failed: {}", e);
        }
        Ok(session)
    }

    pub fn with_backend(
        config: ExtensionConfig,
        store: Arc<MemoryStore>,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        let browser = LocalBrowser::new();
        let background = BackgroundCoordinator::new(
            config.clone(),
            store.clone(),
            Arc::new(browser.clone()),
            Arc::new(browser.clone()),
        );
        let handle = background.start();
        Self {
            config,
            store,
            browser,
            backend,
            background,
            _handle: handle,
        }
    }

    pub async fn popup(&self) -> anyhow::Result<Arc<PopupController>> {
        Ok(PopupController::open(
            self.config.clone(),
            self.store.clone(),
            Arc::new(self.browser.clone()),
            Arc::new(self.browser.clone()),
            self.backend.clone(),
        )
        .await?)
    }

    /// Ask the background for auth status, the way the popup would. An
    /// extraction record past the retention window reads as absent.
    pub async fn status(&self) -> anyhow::Result<StatusReport> {
        let reply = self.browser.send_runtime(Message::GetAuthStatus).await?;
        let (authenticated, email) = match reply {
            Some(Response::AuthStatus {
                is_authenticated,
                user_email,
            }) => (is_authenticated, user_email),
            Some(Response::Error { error }) => anyhow::bail!(error),
            other => anyhow::bail!("unexpected reply: {:?}", other),
        };
        let mut extraction = load_extraction(self.store.as_ref()).await?;
        if extraction.is_stale(now_millis(), self.config.retention()) {
            extraction = ExtractionRecord::default();
        }
        Ok(StatusReport {
            authenticated,
            email,
            extraction,
        })
    }

    /// Load `html` as if the browser navigated to `url`, then run one
    /// extraction in it.
    pub async fn extract(&self, html: &str, url: &str) -> anyhow::Result<ExtractionOutcome> {
        let tab_id = self.browser.add_tab(url, true);
        let tab = self
            .browser
            .tab(tab_id)
            .ok_or_else(|| anyhow::anyhow!("tab {} vanished", tab_id))?;
        self.background
            .on_tab_updated(&tab, TabStatus::Complete)
            .await;

        let page = Arc::new(LocalPage::new(tab_id, url, html));
        let agent = ContentAgent::new(
            self.config.clone(),
            self.store.clone(),
            Arc::new(self.browser.clone()),
            page.clone(),
            self.backend.clone(),
            Arc::new(ProfileScraper::default()),
        );
        agent.start().await?;
        if !agent.is_authenticated() {
            anyhow::bail!("Not connected. Run 'inlink login <email>' first.");
        }

        let outcome = agent.extract_profile().await;
        for (message, _) in page.status_history() {
            info!("{}", message);
        }
        agent.shutdown();
        Ok(outcome)
    }
}
