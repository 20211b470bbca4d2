//! Protocol scenarios — background, content agents and popup wired together
//! over an in-process browser, shared store and fake backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use inlink_core::store::{load_credential, load_extraction, record_extraction_completed};
use inlink_core::types::{keys, now_millis};
use inlink_core::{
    ExtractionStatus, Message, MessageBus, MessageHandler, ProfileData, Response, SharedStore,
    TabHost,
};
use inlink_extension::{
    ConnectStep, ExtractionOutcome, ExtractionView, OtpInput, PopupView, StatusKind, TabStatus,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Sign in through the popup: e-mail, six digits, token persisted, and the
/// content agent in the active tab picks up the new state.
#[tokio::test]
async fn test_login_end_to_end() {
    let harness = Harness::new();
    let (page, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    assert!(!agent.is_authenticated());
    assert!(!page.affordance_visible());

    let popup = harness.popup().await;
    assert!(popup.submit_email("a@b.com").await);
    assert_eq!(popup.view(), PopupView::Connect(ConnectStep::Code));
    assert_eq!(
        popup.status().unwrap().message,
        "Verification code sent to your email"
    );

    for (i, ch) in OTP_CODE.chars().enumerate().take(5) {
        assert_eq!(
            popup.input_digit(i, ch).await,
            OtpInput::Advanced { focus: i + 1 }
        );
    }
    assert_eq!(popup.input_digit(5, '6').await, OtpInput::Complete);

    assert_eq!(
        popup.view(),
        PopupView::Connected {
            email: Some("a@b.com".into())
        }
    );
    let credential = load_credential(harness.store.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.token, TOKEN);
    assert_eq!(credential.email.as_deref(), Some("a@b.com"));

    assert!(agent.is_authenticated());
    assert_eq!(agent.token().as_deref(), Some(TOKEN));
    assert!(page.affordance_visible());

    assert!(eventually(|| harness.backend.approvals.lock().len() == 1).await);
    let (token, request) = harness.backend.approvals.lock()[0].clone();
    assert_eq!(token, TOKEN);
    assert_eq!(request.user_email.as_deref(), Some("a@b.com"));
    assert_eq!(request.extension_version, harness.config.extension_version);
}

/// A wrong code clears the cells and keeps the popup on the code step.
#[tokio::test]
async fn test_wrong_code_clears_entry() {
    let harness = Harness::new();
    let popup = harness.popup().await;
    assert!(popup.submit_email("a@b.com").await);

    assert!(popup.paste_code("000000").await);
    assert_eq!(popup.view(), PopupView::Connect(ConnectStep::Code));
    assert_eq!(popup.status().unwrap().message, "Invalid verification code");
    assert_eq!(popup.otp().code(), "");
    assert!(load_credential(harness.store.as_ref())
        .await
        .unwrap()
        .is_none());
}

/// Every agent on the site converges on the stored credential state.
#[tokio::test]
async fn test_auth_flag_converges_across_tabs() {
    let harness = Harness::new();
    let (own_page, own) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    let (_, feed) = harness.open_tab(FEED_URL, FEED, false).await;

    inlink_core::store::save_credential(
        harness.store.as_ref(),
        &inlink_core::SessionCredential {
            token: TOKEN.into(),
            email: None,
        },
    )
    .await
    .unwrap();

    assert!(eventually(|| own.is_authenticated() && feed.is_authenticated()).await);
    assert!(eventually(|| feed.token().as_deref() == Some(TOKEN)).await);
    assert!(eventually(|| own_page.affordance_visible()).await);

    let reply = harness.browser.send_runtime(Message::ClearAuth).await.unwrap();
    assert_eq!(reply, Some(Response::ok()));

    assert!(eventually(|| !own.is_authenticated() && !feed.is_authenticated()).await);
    assert!(eventually(|| !own_page.affordance_visible()).await);
    assert!(harness.store.snapshot().is_empty());
}

/// Disconnecting from the popup signs every tab out.
#[tokio::test]
async fn test_disconnect_signs_out_tabs() {
    let harness = Harness::new();
    let (page, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    let popup = harness.popup().await;
    assert!(popup.submit_email("a@b.com").await);
    assert!(popup.paste_code(OTP_CODE).await);
    assert!(page.affordance_visible());

    popup.disconnect().await.unwrap();
    assert_eq!(popup.view(), PopupView::Connect(ConnectStep::Email));
    assert!(!agent.is_authenticated());
    assert!(!page.affordance_visible());
    assert!(harness.store.snapshot().is_empty());
}

async fn signed_in_harness() -> Harness {
    let harness = Harness::new();
    inlink_core::store::save_credential(
        harness.store.as_ref(),
        &inlink_core::SessionCredential {
            token: TOKEN.into(),
            email: Some("a@b.com".into()),
        },
    )
    .await
    .unwrap();
    harness
}

/// A successful extraction submits once, records the data and tells the popup.
#[tokio::test(start_paused = true)]
async fn test_extraction_saves_profile() {
    let harness = signed_in_harness().await;
    let (page, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    let popup = harness.popup().await;

    let outcome = agent.extract_profile().await;
    let data = match outcome {
        ExtractionOutcome::Saved(data) => data,
        other => panic!("expected saved profile, got {:?}", other),
    };
    assert_eq!(data.full_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(data.current_position.as_deref(), Some("Analyst"));

    let submissions = harness.backend.submissions.lock().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, TOKEN);
    assert_eq!(submissions[0].1.linkedin_url, OWN_PROFILE_URL);

    let record = load_extraction(harness.store.as_ref()).await.unwrap();
    assert_eq!(record.status, ExtractionStatus::Completed);
    assert_eq!(record.data.as_ref(), Some(&data));
    assert!(record.last_extraction.is_some());

    assert!(matches!(popup.extraction(), ExtractionView::Completed { .. }));
    assert_eq!(
        page.status(),
        Some((
            "✅ Profile extracted successfully!".to_string(),
            StatusKind::Success
        ))
    );
}

/// A second request while one is running changes nothing.
#[tokio::test(start_paused = true)]
async fn test_extraction_is_single_flight() {
    let harness = signed_in_harness().await;
    let (_, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    harness.backend.delay_saves(Duration::from_secs(3));

    let (first, second) = tokio::join!(agent.extract_profile(), agent.extract_profile());
    assert!(matches!(first, ExtractionOutcome::Saved(_)));
    assert_eq!(second, ExtractionOutcome::AlreadyRunning);
    assert_eq!(harness.backend.submission_count(), 1);
    assert!(!agent.is_extracting());

    // Guard released: a later run goes through.
    assert!(matches!(
        agent.extract_profile().await,
        ExtractionOutcome::Saved(_)
    ));
    assert_eq!(harness.backend.submission_count(), 2);
}

/// A page that never settles is abandoned after settle delay plus timeout.
#[tokio::test(start_paused = true)]
async fn test_extraction_time_is_bounded() {
    let harness = signed_in_harness().await;
    let (page, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    page.set_document_delay(Some(Duration::from_secs(600)));

    let started = Instant::now();
    let outcome = agent.extract_profile().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, ExtractionOutcome::Empty);
    assert!(elapsed >= harness.config.settle_delay() + harness.config.extraction_timeout());
    assert!(elapsed < Duration::from_secs(13));
    assert_eq!(harness.backend.submission_count(), 0);
}

/// Nothing scraped: the user is told and the backend is never called.
#[tokio::test(start_paused = true)]
async fn test_empty_extraction_skips_backend() {
    let harness = signed_in_harness().await;
    let (page, agent) = harness.open_tab(FEED_URL, FEED, true).await;

    assert_eq!(agent.extract_profile().await, ExtractionOutcome::Empty);
    assert_eq!(harness.backend.submission_count(), 0);
    assert_eq!(
        page.status(),
        Some(("❌ No profile data found".to_string(), StatusKind::Error))
    );

    let record = load_extraction(harness.store.as_ref()).await.unwrap();
    assert_eq!(record.status, ExtractionStatus::Failed);
    assert_eq!(
        record.error.map(|e| e.error).as_deref(),
        Some("No profile data found")
    );
}

/// A rejected save is stored as a structured failure; the indicator goes
/// away after the dismiss delay.
#[tokio::test(start_paused = true)]
async fn test_failed_save_is_recorded_and_dismissed() {
    let harness = signed_in_harness().await;
    let (page, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    harness.backend.fail_saves_with(401);

    let failure = match agent.extract_profile().await {
        ExtractionOutcome::Failed(failure) => failure,
        other => panic!("expected failure, got {:?}", other),
    };
    assert!(!failure.success);
    assert_eq!(failure.status, Some(401));

    let (message, kind) = page.status().unwrap();
    assert_eq!(message, "❌ Failed to save: HTTP 401: unauthorized");
    assert_eq!(kind, StatusKind::Error);

    let record = load_extraction(harness.store.as_ref()).await.unwrap();
    assert_eq!(record.status, ExtractionStatus::Failed);
    assert_eq!(record.error, Some(failure));

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(page.status().is_some());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(eventually(|| page.status().is_none()).await);
}

/// The popup's trigger path: a tab message starts an extraction.
#[tokio::test(start_paused = true)]
async fn test_trigger_extraction_via_tab_message() {
    let harness = signed_in_harness().await;
    let (_, agent) = harness.open_tab(OWN_PROFILE_URL, OWN_PROFILE, true).await;
    let tab = harness.browser.tabs()[0].id;

    harness.background.trigger_extraction(tab).await;
    assert!(eventually(|| harness.backend.submission_count() == 1).await);
    assert!(eventually(|| !agent.is_extracting()).await);
}

/// In-app navigation re-evaluates the affordance after the navigation delay.
#[tokio::test(start_paused = true)]
async fn test_navigation_reruns_setup() {
    let harness = signed_in_harness().await;
    let (page, _agent) = harness.open_tab(FEED_URL, FEED, true).await;
    assert!(!page.affordance_visible());

    page.navigate(OWN_PROFILE_URL, OWN_PROFILE);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!page.affordance_visible());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(eventually(|| page.affordance_visible()).await);

    // A mutation without an address change does nothing.
    let mounts = page.mount_count();
    page.set_html(OWN_PROFILE);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(page.mount_count(), mounts);

    page.navigate(FEED_URL, FEED);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(eventually(|| !page.affordance_visible()).await);
}

/// Stale records are swept by the background timer; fresh ones survive.
#[tokio::test(start_paused = true)]
async fn test_periodic_sweep() {
    let harness = Harness::new();
    let data = ProfileData {
        full_name: Some("Ada".into()),
        ..Default::default()
    };

    record_extraction_completed(harness.store.as_ref(), &data, now_millis())
        .await
        .unwrap();
    assert!(!harness.background.sweep().await.unwrap());

    record_extraction_completed(
        harness.store.as_ref(),
        &data,
        now_millis() - 2 * 3_600_000,
    )
    .await
    .unwrap();

    tokio::time::sleep(harness.config.sweep_interval() + Duration::from_secs(1)).await;
    assert!(eventually(|| !harness.store.snapshot().contains_key(keys::EXTRACTED_DATA)).await);
    for key in keys::EXTRACTION_FIELDS {
        assert!(!harness.store.snapshot().contains_key(*key));
    }
}

struct Recorder(Mutex<Vec<Message>>);

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_message(&self, message: Message) -> Option<Response> {
        self.0.lock().push(message);
        None
    }
}

/// Runtime requests reach the background; notifyExtraction fans out to
/// site tabs only.
#[tokio::test]
async fn test_background_runtime_actions() {
    let harness = signed_in_harness().await;
    let site_tab = harness.browser.add_tab(OWN_PROFILE_URL, false);
    let other_tab = harness.browser.add_tab("https://example.com/", true);

    let site = Arc::new(Recorder(Mutex::new(Vec::new())));
    let other = Arc::new(Recorder(Mutex::new(Vec::new())));
    let _site_sub = harness.browser.on_tab_message(site_tab, site.clone());
    let _other_sub = harness.browser.on_tab_message(other_tab, other.clone());

    let reply = harness
        .browser
        .send_runtime(Message::GetAuthStatus)
        .await
        .unwrap();
    assert_eq!(
        reply,
        Some(Response::AuthStatus {
            is_authenticated: true,
            user_email: Some("a@b.com".into()),
        })
    );

    let notify = Message::NotifyExtraction {
        data: Some(ProfileData {
            full_name: Some("Ada".into()),
            ..Default::default()
        }),
    };
    let reply = harness.browser.send_runtime(notify.clone()).await.unwrap();
    assert_eq!(reply, Some(Response::ok()));
    let relayed: Vec<Message> = site
        .0
        .lock()
        .iter()
        .filter(|m| matches!(m, Message::NotifyExtraction { .. }))
        .cloned()
        .collect();
    assert_eq!(relayed, vec![notify]);
    assert!(other.0.lock().is_empty());

    let reply = harness
        .browser
        .send_runtime(Message::OpenDashboard)
        .await
        .unwrap();
    assert_eq!(reply, Some(Response::ok()));
    let active = harness.browser.active_tab().await.unwrap().unwrap();
    assert_eq!(active.url, harness.config.dashboard_url);

    let reply = harness
        .browser
        .send_runtime(Message::Unknown)
        .await
        .unwrap();
    assert_eq!(reply, Some(Response::error("Unknown action")));
}

/// Completed site tabs get a content agent once; others are left alone.
#[tokio::test]
async fn test_tab_update_injection() {
    let harness = signed_in_harness().await;
    let injected = Arc::new(Mutex::new(Vec::new()));
    {
        let injected = injected.clone();
        harness.browser.set_injector(move |tab| {
            injected.lock().push(tab);
            Ok(())
        });
    }

    let fresh = harness.browser.add_tab(OWN_PROFILE_URL, false);
    let (_, _agent) = harness.open_tab(FEED_URL, FEED, true).await;
    let listening = harness.browser.tabs()[1].clone();

    let tab = harness.browser.tab(fresh).unwrap();
    harness.background.on_tab_updated(&tab, TabStatus::Complete).await;
    harness.background.on_tab_updated(&tab, TabStatus::Complete).await;
    harness
        .background
        .on_tab_updated(&listening, TabStatus::Complete)
        .await;

    assert_eq!(injected.lock().as_slice(), &[fresh]);
}

/// Deleting the credential from the store alone is enough to sign tabs out.
#[tokio::test]
async fn test_storage_removal_broadcasts_sign_out() {
    let harness = signed_in_harness().await;
    let (_, agent) = harness.open_tab(FEED_URL, FEED, true).await;
    assert!(agent.is_authenticated());

    harness
        .store
        .remove(&[keys::AUTH_TOKEN, keys::USER_EMAIL])
        .await
        .unwrap();
    assert!(eventually(|| !agent.is_authenticated()).await);
}

/// Without a background relay, the popup alone tells the active site tab
/// about sign-in and sign-out; off-site tabs hear nothing.
#[tokio::test]
async fn test_popup_notifies_active_tab_directly() {
    let config = inlink_core::ExtensionConfig::default();
    let store = Arc::new(inlink_core::MemoryStore::new());
    let browser = inlink_core::LocalBrowser::new();
    let backend = FakeBackend::new();

    let background_tab = browser.add_tab("https://example.com/", false);
    let active_tab = browser.add_tab(OWN_PROFILE_URL, true);
    let active = Arc::new(Recorder(Mutex::new(Vec::new())));
    let background = Arc::new(Recorder(Mutex::new(Vec::new())));
    let _active_sub = browser.on_tab_message(active_tab, active.clone());
    let _background_sub = browser.on_tab_message(background_tab, background.clone());

    let popup = inlink_extension::PopupController::open(
        config,
        store,
        Arc::new(browser.clone()),
        Arc::new(browser.clone()),
        backend,
    )
    .await
    .unwrap();
    assert!(popup.submit_email("a@b.com").await);
    assert!(popup.paste_code(OTP_CODE).await);
    popup.disconnect().await.unwrap();

    assert_eq!(
        active.0.lock().clone(),
        vec![
            Message::AuthStatusChanged {
                is_authenticated: true,
                auth_token: Some(TOKEN.into()),
            },
            Message::AuthStatusChanged {
                is_authenticated: false,
                auth_token: None,
            },
        ]
    );
    assert!(background.0.lock().is_empty());
}
