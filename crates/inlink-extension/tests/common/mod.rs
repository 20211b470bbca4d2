//! Shared fixtures: a recording backend and a wired-up browser.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inlink_api::{
    ApprovalRequest, BackendClient, ProfileSubmission, SaveProfileResponse, SendOtpResponse,
    VerifyOtpResponse,
};
use inlink_core::{Error, ExtensionConfig, LocalBrowser, MemoryStore, Result};
use inlink_extension::{
    BackgroundCoordinator, BackgroundHandle, ContentAgent, LocalPage, PopupController,
};
use inlink_scrape::ProfileScraper;
use parking_lot::Mutex;

pub const OTP_CODE: &str = "123456";
pub const TOKEN: &str = "T";

pub const OWN_PROFILE_URL: &str = "https://www.linkedin.com/in/ada/";
pub const FEED_URL: &str = "https://www.linkedin.com/feed/";

pub const OWN_PROFILE: &str = r#"
    <html><body>
      <button data-test-id="profile-edit-button">Edit profile</button>
      <h1 class="inline t-24 v-align-middle break-words">Ada Lovelace</h1>
      <div class="text-body-medium break-words">Analyst at Analytical Engines Ltd</div>
      <div class="pv-top-card--list-bullet"><span class="text-body-small">London</span></div>
    </body></html>
"#;

pub const FEED: &str = "<html><body><div class='feed'>Posts</div></body></html>";

/// Backend double that records every call.
#[derive(Default)]
pub struct FakeBackend {
    pub otp_requests: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<(String, ProfileSubmission)>>,
    pub approvals: Mutex<Vec<(String, ApprovalRequest)>>,
    save_failure: Mutex<Option<u16>>,
    save_delay: Mutex<Option<Duration>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make save-profile answer with this HTTP status.
    pub fn fail_saves_with(&self, status: u16) {
        *self.save_failure.lock() = Some(status);
    }

    pub fn delay_saves(&self, delay: Duration) {
        *self.save_delay.lock() = Some(delay);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn send_otp(&self, email: &str) -> Result<SendOtpResponse> {
        self.otp_requests.lock().push(email.to_string());
        Ok(SendOtpResponse {
            success: true,
            error: None,
        })
    }

    async fn verify_otp(&self, _email: &str, otp: &str) -> Result<VerifyOtpResponse> {
        if otp == OTP_CODE {
            Ok(VerifyOtpResponse {
                success: true,
                token: Some(TOKEN.into()),
                error: None,
            })
        } else {
            Ok(VerifyOtpResponse {
                success: false,
                token: None,
                error: Some("Invalid verification code".into()),
            })
        }
    }

    async fn save_profile(
        &self,
        token: &str,
        submission: &ProfileSubmission,
    ) -> Result<SaveProfileResponse> {
        let delay = *self.save_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.submissions
            .lock()
            .push((token.to_string(), submission.clone()));

        let failure = *self.save_failure.lock();
        match failure {
            Some(status) => Err(Error::Backend {
                status,
                body: "unauthorized".into(),
            }),
            None => Ok(SaveProfileResponse {
                success: true,
                error: None,
                message: Some("saved".into()),
            }),
        }
    }

    async fn request_approval(&self, token: &str, request: &ApprovalRequest) -> Result<()> {
        self.approvals
            .lock()
            .push((token.to_string(), request.clone()));
        Ok(())
    }
}

/// One browser with a running background coordinator.
pub struct Harness {
    pub config: ExtensionConfig,
    pub store: Arc<MemoryStore>,
    pub browser: LocalBrowser,
    pub backend: Arc<FakeBackend>,
    pub background: Arc<BackgroundCoordinator>,
    handle: BackgroundHandle,
}

impl Harness {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let config = ExtensionConfig::default();
        let store = Arc::new(MemoryStore::new());
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
            backend: FakeBackend::new(),
            background,
            handle,
        }
    }

    /// Open a tab and start a content agent in it.
    pub async fn open_tab(
        &self,
        url: &str,
        html: &str,
        active: bool,
    ) -> (Arc<LocalPage>, Arc<ContentAgent>) {
        let tab = self.browser.add_tab(url, active);
        let page = Arc::new(LocalPage::new(tab, url, html));
        let agent = ContentAgent::new(
            self.config.clone(),
            self.store.clone(),
            Arc::new(self.browser.clone()),
            page.clone(),
            self.backend.clone(),
            Arc::new(ProfileScraper::default()),
        );
        agent.start().await.unwrap();
        (page, agent)
    }

    pub async fn popup(&self) -> Arc<PopupController> {
        PopupController::open(
            self.config.clone(),
            self.store.clone(),
            Arc::new(self.browser.clone()),
            Arc::new(self.browser.clone()),
            self.backend.clone(),
        )
        .await
        .unwrap()
    }
}

/// Poll `condition` until it holds, giving spawned tasks time to run.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
