//! Popup controller — one-time-code sign-in and extraction progress.
//!
//! The view is plain state; a front end renders `view()`, `extraction()`,
//! `status()` and `otp()` after every call.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use inlink_api::{ApprovalRequest, BackendClient};
use inlink_core::store::{load_credential, load_extraction, save_credential};
use inlink_core::types::now_millis;
use inlink_core::{
    Error, ExtensionConfig, ExtractionRecord, ExtractionStatus, Message, MessageBus,
    MessageHandler, ProfileData, Response, Result, SessionCredential, SharedStore, Subscription,
    TabHost,
};
use inlink_scrape::identity::is_matching_site;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::page::StatusKind;

pub const OTP_LEN: usize = 6;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

const NETWORK_ERROR: &str = "Network error. Please check your connection.";

fn validate_email(email: &str) -> Result<&str> {
    let email = email.trim();
    if email.is_empty() {
        return Err(Error::Validation("Please enter your email address".into()));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(Error::Validation("Please enter a valid email address".into()));
    }
    Ok(email)
}

fn validate_code(code: &str) -> Result<()> {
    if code.len() != OTP_LEN || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("Please enter the complete 6-digit code".into()));
    }
    Ok(())
}

/// Six single-digit cells with a focus cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpEntry {
    cells: [Option<char>; OTP_LEN],
    focus: usize,
}

/// Result of typing into a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpInput {
    Rejected,
    Advanced { focus: usize },
    /// All cells are filled.
    Complete,
}

impl OtpEntry {
    pub fn input(&mut self, index: usize, ch: char) -> OtpInput {
        if index >= OTP_LEN || !ch.is_ascii_digit() {
            return OtpInput::Rejected;
        }
        self.cells[index] = Some(ch);
        self.focus = (index + 1).min(OTP_LEN - 1);
        if self.is_complete() {
            OtpInput::Complete
        } else {
            OtpInput::Advanced { focus: self.focus }
        }
    }

    /// Clear a filled cell, or step back from an empty one. Returns the focus.
    pub fn backspace(&mut self, index: usize) -> usize {
        let index = index.min(OTP_LEN - 1);
        if self.cells[index].take().is_none() && index > 0 {
            self.focus = index - 1;
        } else {
            self.focus = index;
        }
        self.focus
    }

    /// Fill every cell from the digits of `text`. Needs at least six digits.
    pub fn paste(&mut self, text: &str) -> bool {
        let digits: Vec<char> = text.chars().filter(char::is_ascii_digit).take(OTP_LEN).collect();
        if digits.len() < OTP_LEN {
            return false;
        }
        for (cell, digit) in self.cells.iter_mut().zip(digits) {
            *cell = Some(digit);
        }
        self.focus = OTP_LEN - 1;
        true
    }

    pub fn code(&self) -> String {
        self.cells.iter().flatten().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    Email,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupView {
    Connect(ConnectStep),
    Connected { email: Option<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExtractionView {
    #[default]
    Nothing,
    InProgress,
    /// Labelled preview rows (name, headline, company, location).
    Completed { preview: Vec<(String, String)> },
}

impl ExtractionView {
    fn from_record(record: &ExtractionRecord, now_ms: i64, config: &ExtensionConfig) -> Self {
        if record.is_stale(now_ms, config.retention()) {
            return Self::Nothing;
        }
        match (record.status, &record.data) {
            (ExtractionStatus::InProgress, _) => Self::InProgress,
            (ExtractionStatus::Completed, Some(data)) => Self::completed(data),
            _ => Self::Nothing,
        }
    }

    fn completed(data: &ProfileData) -> Self {
        let preview = [
            ("Name", &data.full_name),
            ("Headline", &data.headline),
            ("Company", &data.company),
            ("Location", &data.location),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| (label.to_string(), v.clone())))
        .collect();
        Self::Completed { preview }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub message: String,
    pub kind: StatusKind,
}

struct PopupState {
    view: PopupView,
    extraction: ExtractionView,
    email: Option<String>,
    otp: OtpEntry,
    status: Option<StatusLine>,
}

pub struct PopupController {
    config: ExtensionConfig,
    store: Arc<dyn SharedStore>,
    bus: Arc<dyn MessageBus>,
    tabs: Arc<dyn TabHost>,
    backend: Arc<dyn BackendClient>,
    state: RwLock<PopupState>,
    subscription: Mutex<Option<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PopupController {
    /// Render the initial view from the store and start listening for
    /// extraction progress.
    pub async fn open(
        config: ExtensionConfig,
        store: Arc<dyn SharedStore>,
        bus: Arc<dyn MessageBus>,
        tabs: Arc<dyn TabHost>,
        backend: Arc<dyn BackendClient>,
    ) -> Result<Arc<Self>> {
        let credential = load_credential(store.as_ref()).await?;
        let record = load_extraction(store.as_ref()).await?;

        let (view, email) = match credential {
            Some(credential) => (
                PopupView::Connected {
                    email: credential.email.clone(),
                },
                credential.email,
            ),
            None => (PopupView::Connect(ConnectStep::Email), None),
        };
        let extraction = ExtractionView::from_record(&record, now_millis(), &config);

        let popup = Arc::new(Self {
            config,
            store,
            bus,
            tabs,
            backend,
            state: RwLock::new(PopupState {
                view,
                extraction,
                email,
                otp: OtpEntry::default(),
                status: None,
            }),
            subscription: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let subscription = popup
            .bus
            .on_runtime_message(Arc::new(PopupListener(Arc::downgrade(&popup))));
        *popup.subscription.lock() = Some(subscription);

        debug!("Popup opened: {:?}", popup.view());
        Ok(popup)
    }

    pub fn view(&self) -> PopupView {
        self.state.read().view.clone()
    }

    pub fn extraction(&self) -> ExtractionView {
        self.state.read().extraction.clone()
    }

    pub fn status(&self) -> Option<StatusLine> {
        self.state.read().status.clone()
    }

    pub fn otp(&self) -> OtpEntry {
        self.state.read().otp.clone()
    }

    fn set_status(&self, message: &str, kind: StatusKind) {
        self.state.write().status = Some(StatusLine {
            message: message.to_string(),
            kind,
        });
    }

    // ---------------------------------------------------------------
    // Connect flow
    // ---------------------------------------------------------------

    /// Validate the address and ask the backend for a code. Moves to the code
    /// step on success.
    pub async fn submit_email(&self, email: &str) -> bool {
        let email = match validate_email(email) {
            Ok(email) => email,
            Err(e) => {
                self.reject_input(e);
                return false;
            }
        };

        self.set_status("Sending verification code...", StatusKind::Info);
        match self.backend.send_otp(email).await {
            Ok(reply) if reply.success => {
                {
                    let mut state = self.state.write();
                    state.email = Some(email.to_string());
                    state.view = PopupView::Connect(ConnectStep::Code);
                    state.otp.clear();
                }
                info!("Verification code sent to {}", email);
                self.set_status("Verification code sent to your email", StatusKind::Success);
                true
            }
            Ok(reply) => {
                let message = reply
                    .error
                    .unwrap_or_else(|| "Failed to send verification code".to_string());
                self.set_status(&message, StatusKind::Error);
                false
            }
            Err(e) => {
                error!("send-otp failed: {}", e);
                self.set_status(NETWORK_ERROR, StatusKind::Error);
                false
            }
        }
    }

    /// Type a digit into a cell. Filling the last empty cell submits the code.
    pub async fn input_digit(&self, index: usize, ch: char) -> OtpInput {
        let input = self.state.write().otp.input(index, ch);
        if input == OtpInput::Complete {
            self.verify_code().await;
        }
        input
    }

    pub fn backspace(&self, index: usize) -> usize {
        self.state.write().otp.backspace(index)
    }

    /// Paste a code. A paste with six or more digits fills the cells and
    /// submits.
    pub async fn paste_code(&self, text: &str) -> bool {
        let filled = self.state.write().otp.paste(text);
        if filled {
            self.verify_code().await;
        }
        filled
    }

    pub async fn press_enter(&self) -> bool {
        let step = self.view();
        match step {
            PopupView::Connect(ConnectStep::Code) => self.verify_code().await,
            _ => false,
        }
    }

    /// Exchange the entered code for a session token.
    pub async fn verify_code(&self) -> bool {
        let (email, code) = {
            let state = self.state.read();
            (state.email.clone(), state.otp.code())
        };
        if let Err(e) = validate_code(&code) {
            self.reject_input(e);
            return false;
        }
        let Some(email) = email else {
            self.state.write().view = PopupView::Connect(ConnectStep::Email);
            self.set_status("Please enter your email address", StatusKind::Error);
            return false;
        };

        self.set_status("Verifying...", StatusKind::Info);
        let token = match self.backend.verify_otp(&email, &code).await {
            Ok(reply) => match reply.token.filter(|t| reply.success && !t.is_empty()) {
                Some(token) => token,
                None => {
                    let message = reply
                        .error
                        .unwrap_or_else(|| "Invalid verification code".to_string());
                    self.reject_code(&message);
                    return false;
                }
            },
            Err(e) => {
                error!("verify-otp failed: {}", e);
                self.reject_code(NETWORK_ERROR);
                return false;
            }
        };

        let credential = SessionCredential {
            token: token.clone(),
            email: Some(email.clone()),
        };
        if let Err(e) = save_credential(self.store.as_ref(), &credential).await {
            error!("Failed to persist credential: {}", e);
            self.set_status(&e.to_string(), StatusKind::Error);
            return false;
        }

        {
            let mut state = self.state.write();
            state.view = PopupView::Connected {
                email: Some(email.clone()),
            };
            state.otp.clear();
        }
        info!("Connected as {}", email);
        self.set_status("Successfully connected!", StatusKind::Success);

        self.notify_active_tab(Message::AuthStatusChanged {
            is_authenticated: true,
            auth_token: Some(token.clone()),
        })
        .await;
        self.request_approval(token, email);
        true
    }

    fn reject_input(&self, err: Error) {
        let message = match err {
            Error::Validation(message) => message,
            other => other.to_string(),
        };
        self.set_status(&message, StatusKind::Error);
    }

    fn reject_code(&self, message: &str) {
        self.state.write().otp.clear();
        self.set_status(message, StatusKind::Error);
    }

    fn request_approval(&self, token: String, email: String) {
        let backend = self.backend.clone();
        let request = ApprovalRequest {
            user_email: Some(email),
            extension_version: self.config.extension_version.clone(),
        };
        let task = tokio::spawn(async move {
            match backend.request_approval(&token, &request).await {
                Ok(()) => debug!("Approval requested"),
                Err(e) => warn!("Approval request failed: {}", e),
            }
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Sign out everywhere and return to the e-mail step.
    pub async fn disconnect(&self) -> Result<()> {
        self.store.clear().await?;
        {
            let mut state = self.state.write();
            state.view = PopupView::Connect(ConnectStep::Email);
            state.extraction = ExtractionView::Nothing;
            state.email = None;
            state.otp.clear();
            state.status = None;
        }
        info!("Disconnected");

        self.notify_active_tab(Message::AuthStatusChanged {
            is_authenticated: false,
            auth_token: None,
        })
        .await;
        Ok(())
    }

    pub async fn open_dashboard(&self) -> Result<()> {
        self.bus.send_runtime(Message::OpenDashboard).await?;
        Ok(())
    }

    /// Tell the content agent in the active tab, if it is on the target site.
    async fn notify_active_tab(&self, message: Message) {
        let tab = match self.tabs.active_tab().await {
            Ok(Some(tab)) => tab,
            Ok(None) => return,
            Err(e) => {
                debug!("Active tab unavailable: {}", e);
                return;
            }
        };
        if !is_matching_site(&tab.url, &self.config.site_domain) {
            return;
        }
        if let Err(e) = self.bus.send_to_tab(tab.id, message).await {
            debug!("Tab {} not listening: {}", tab.id, e);
        }
    }

    pub fn on_message(&self, message: &Message) {
        let extraction = match message {
            Message::ExtractionStarted => ExtractionView::InProgress,
            Message::ExtractionCompleted { data } => ExtractionView::completed(data),
            _ => return,
        };
        self.state.write().extraction = extraction;
    }

    /// Stop listening and drop pending requests.
    pub fn close(&self) {
        self.subscription.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

struct PopupListener(Weak<PopupController>);

#[async_trait]
impl MessageHandler for PopupListener {
    async fn on_message(&self, message: Message) -> Option<Response> {
        if let Some(popup) = self.0.upgrade() {
            popup.on_message(&message);
        }
        None
    }
}
