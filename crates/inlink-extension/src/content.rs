//! Content agent — runs inside one tab of the target site.
//!
//! Mounts the extraction affordance on the user's own profile, scrapes the
//! page on request and submits the result to the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use inlink_api::{BackendClient, ProfileSubmission};
use inlink_core::race::first_of;
use inlink_core::store::{
    load_credential, record_extraction_completed, record_extraction_failed,
    record_extraction_started,
};
use inlink_core::types::now_millis;
use inlink_core::{
    ExtensionConfig, ExtractionFailure, Message, MessageBus, MessageHandler, ProfileData, Response,
    Result, SharedStore, Subscription,
};
use inlink_scrape::identity::is_matching_site;
use inlink_scrape::{PageIdentity, ProfileScraper};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::page::{PageHost, StatusKind};

/// How an `extract_profile` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Another extraction held the guard; nothing was done.
    AlreadyRunning,
    Saved(ProfileData),
    /// Nothing scraped (or the scrape timed out). No backend call was made.
    Empty,
    Failed(ExtractionFailure),
}

#[derive(Debug, Default)]
struct AuthState {
    authenticated: bool,
    token: Option<String>,
}

/// Held for the duration of one extraction. Released on drop, so a panic or
/// an early return cannot leave the agent stuck.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ContentAgent {
    config: ExtensionConfig,
    store: Arc<dyn SharedStore>,
    bus: Arc<dyn MessageBus>,
    page: Arc<dyn PageHost>,
    backend: Arc<dyn BackendClient>,
    scraper: Arc<ProfileScraper>,
    auth: RwLock<AuthState>,
    in_flight: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dismiss: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ContentAgent {
    pub fn new(
        config: ExtensionConfig,
        store: Arc<dyn SharedStore>,
        bus: Arc<dyn MessageBus>,
        page: Arc<dyn PageHost>,
        backend: Arc<dyn BackendClient>,
        scraper: Arc<ProfileScraper>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            bus,
            page,
            backend,
            scraper,
            auth: RwLock::new(AuthState::default()),
            in_flight: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            dismiss: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Read the credential, listen for tab messages and watch for in-app
    /// navigation. Does nothing off the target site.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let location = self.page.location().await?;
        if !is_matching_site(&location, &self.config.site_domain) {
            debug!("Not on {}, content agent idle", self.config.site_domain);
            return Ok(());
        }

        match load_credential(self.store.as_ref()).await {
            Ok(credential) => {
                let authenticated = credential.is_some();
                self.set_auth(authenticated, credential.map(|c| c.token));
            }
            Err(e) => warn!("Failed to read credential, staying passive: {}", e),
        }

        let subscription = self.bus.on_tab_message(
            self.page.tab_id(),
            Arc::new(TabListener(Arc::downgrade(self))),
        );
        self.subscriptions.lock().push(subscription);

        if let Err(e) = self.setup_affordance().await {
            warn!("Affordance setup failed: {}", e);
        }
        self.observe_navigation(location);

        info!(
            "Content agent started on tab {} (authenticated: {})",
            self.page.tab_id(),
            self.is_authenticated()
        );
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.read().authenticated
    }

    pub fn token(&self) -> Option<String> {
        self.auth.read().token.clone()
    }

    pub fn is_extracting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn set_auth(&self, authenticated: bool, token: Option<String>) {
        let mut auth = self.auth.write();
        auth.authenticated = authenticated;
        auth.token = if authenticated { token } else { None };
    }

    /// Mount the affordance when signed in on the user's own profile, and
    /// remove it otherwise. Returns whether it is mounted.
    pub async fn setup_affordance(&self) -> Result<bool> {
        let location = self.page.location().await?;
        let html = self.page.document_html().await?;
        let identity = PageIdentity::inspect(&location, &html, &self.config.site_domain);

        if self.is_authenticated() && identity.wants_affordance() {
            self.page.mount_affordance().await?;
            debug!("Affordance mounted on {}", location);
            Ok(true)
        } else {
            self.page.unmount_affordance().await?;
            Ok(false)
        }
    }

    // ---------------------------------------------------------------
    // Extraction
    // ---------------------------------------------------------------

    /// Scrape the page and submit the result. Concurrent calls return
    /// `AlreadyRunning` without side effects.
    pub async fn extract_profile(&self) -> ExtractionOutcome {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            debug!("Extraction already in progress");
            return ExtractionOutcome::AlreadyRunning;
        };

        let outcome = self.run_extraction().await;
        self.schedule_status_dismiss();
        outcome
    }

    async fn run_extraction(&self) -> ExtractionOutcome {
        self.show_status("Extracting profile data...", StatusKind::Info)
            .await;
        if let Err(e) = record_extraction_started(self.store.as_ref(), now_millis()).await {
            warn!("Failed to record extraction start: {}", e);
        }
        if let Err(e) = self.bus.send_runtime(Message::ExtractionStarted).await {
            debug!("extractionStarted not delivered: {}", e);
        }

        tokio::time::sleep(self.config.settle_delay()).await;
        let data = self.scrape_bounded().await;

        if data.is_empty() {
            self.show_status("❌ No profile data found", StatusKind::Error)
                .await;
            self.record_failure(&ExtractionFailure::new("No profile data found"))
                .await;
            return ExtractionOutcome::Empty;
        }

        match self.submit(&data).await {
            Ok(()) => {
                info!("Profile saved ({} fields)", data.field_count());
                self.show_status("✅ Profile extracted successfully!", StatusKind::Success)
                    .await;
                if let Err(e) =
                    record_extraction_completed(self.store.as_ref(), &data, now_millis()).await
                {
                    warn!("Failed to record extraction result: {}", e);
                }
                let notice = Message::ExtractionCompleted { data: data.clone() };
                if let Err(e) = self.bus.send_runtime(notice).await {
                    debug!("extractionCompleted not delivered: {}", e);
                }
                ExtractionOutcome::Saved(data)
            }
            Err(failure) => {
                error!("Profile save failed: {}", failure.error);
                self.show_status(
                    &format!("❌ Failed to save: {}", failure.error),
                    StatusKind::Error,
                )
                .await;
                self.record_failure(&failure).await;
                ExtractionOutcome::Failed(failure)
            }
        }
    }

    /// Scrape the current document, giving up after the extraction timeout.
    /// Timeouts and read failures both yield an empty mapping.
    async fn scrape_bounded(&self) -> ProfileData {
        let scrape = async {
            match self.page.document_html().await {
                Ok(html) => Some(self.scraper.scrape(&html)),
                Err(e) => {
                    warn!("Document read failed: {}", e);
                    Some(ProfileData::default())
                }
            }
        };
        let limit = self.config.extraction_timeout();
        let expired = async {
            tokio::time::sleep(limit).await;
            None
        };

        match first_of(scrape, expired).await {
            Some(data) => data,
            None => {
                warn!("Extraction timed out after {:?}", limit);
                ProfileData::default()
            }
        }
    }

    async fn submit(&self, data: &ProfileData) -> std::result::Result<(), ExtractionFailure> {
        let token = match self.token() {
            Some(token) => token,
            None => load_credential(self.store.as_ref())
                .await
                .map_err(|e| ExtractionFailure::from(&e))?
                .map(|c| c.token)
                .ok_or_else(|| ExtractionFailure::new("Not authenticated"))?,
        };
        let location = self
            .page
            .location()
            .await
            .map_err(|e| ExtractionFailure::from(&e))?;

        let submission = ProfileSubmission {
            profile: data.clone(),
            linkedin_url: location,
        };
        match self.backend.save_profile(&token, &submission).await {
            Ok(reply) if reply.success => Ok(()),
            Ok(reply) => Err(ExtractionFailure::new(
                reply
                    .error
                    .or(reply.message)
                    .unwrap_or_else(|| "Failed to save profile".to_string()),
            )),
            Err(e) => Err(ExtractionFailure::from(&e)),
        }
    }

    async fn record_failure(&self, failure: &ExtractionFailure) {
        if let Err(e) = record_extraction_failed(self.store.as_ref(), failure, now_millis()).await {
            warn!("Failed to record extraction failure: {}", e);
        }
    }

    /// Show a status, cancelling any dismissal left over from an earlier run.
    async fn show_status(&self, message: &str, kind: StatusKind) {
        if let Some(pending) = self.dismiss.lock().take() {
            pending.abort();
        }
        if let Err(e) = self.page.show_status(message, kind).await {
            debug!("Status indicator unavailable: {}", e);
        }
    }

    fn schedule_status_dismiss(&self) {
        let page = self.page.clone();
        let delay = self.config.status_dismiss();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = page.hide_status().await;
        });
        if let Some(previous) = self.dismiss.lock().replace(task) {
            previous.abort();
        }
    }

    // ---------------------------------------------------------------
    // Navigation and messages
    // ---------------------------------------------------------------

    /// Re-run affordance setup shortly after the address changes without a
    /// page load.
    fn observe_navigation(self: &Arc<Self>, initial: String) {
        let mut mutations = self.page.mutations();
        let agent = Arc::downgrade(self);
        let delay = self.config.navigation_delay();

        self.track(tokio::spawn(async move {
            let mut last = initial;
            loop {
                match mutations.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(this) = agent.upgrade() else {
                    break;
                };
                let Ok(current) = this.page.location().await else {
                    continue;
                };
                if current == last {
                    continue;
                }
                debug!("Navigated to {}", current);
                last = current;

                let weak = Arc::downgrade(&this);
                this.track(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(agent) = weak.upgrade() {
                        if let Err(e) = agent.setup_affordance().await {
                            warn!("Affordance setup failed: {}", e);
                        }
                    }
                }));
            }
        }));
    }

    pub async fn handle_message(self: &Arc<Self>, message: Message) -> Option<Response> {
        match message {
            Message::AuthStatusChanged {
                is_authenticated,
                auth_token,
            } => {
                let token = match auth_token {
                    Some(token) => Some(token),
                    None if is_authenticated => load_credential(self.store.as_ref())
                        .await
                        .ok()
                        .flatten()
                        .map(|c| c.token),
                    None => None,
                };
                self.set_auth(is_authenticated, token);
                debug!("Auth status changed: {}", is_authenticated);

                if let Err(e) = self.setup_affordance().await {
                    warn!("Affordance setup failed: {}", e);
                }
                None
            }
            Message::TriggerExtraction => {
                let agent = self.clone();
                self.track(tokio::spawn(async move {
                    agent.extract_profile().await;
                }));
                Some(Response::ok())
            }
            _ => None,
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Stop listening and cancel pending work.
    pub fn shutdown(&self) {
        self.subscriptions.lock().clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(task) = self.dismiss.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ContentAgent {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        if let Some(task) = self.dismiss.get_mut().take() {
            task.abort();
        }
    }
}

struct TabListener(Weak<ContentAgent>);

#[async_trait]
impl MessageHandler for TabListener {
    async fn on_message(&self, message: Message) -> Option<Response> {
        let agent = self.0.upgrade()?;
        agent.handle_message(message).await
    }
}
