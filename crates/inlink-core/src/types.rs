//! Shared data model — credential, extraction record, profile fields, store keys.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Keys of the shared store.
pub mod keys {
    pub const AUTH_TOKEN: &str = "authToken";
    pub const USER_EMAIL: &str = "userEmail";
    pub const EXTRACTION_STATUS: &str = "extractionStatus";
    pub const EXTRACTED_DATA: &str = "extractedData";
    pub const EXTRACTION_ERROR: &str = "extractionError";
    pub const LAST_EXTRACTION: &str = "lastExtraction";

    /// Fields removed by the retention sweep.
    pub const EXTRACTION_FIELDS: &[&str] = &[
        EXTRACTION_STATUS,
        EXTRACTED_DATA,
        EXTRACTION_ERROR,
        LAST_EXTRACTION,
    ];
}

/// Bearer credential obtained through one-time-code verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: String,
    pub email: Option<String>,
}

/// Lifecycle of the extraction record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Named profile fields produced by the scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    FullName,
    Headline,
    CurrentPosition,
    Company,
    Location,
    AboutSection,
    ProfilePictureUrl,
    Connections,
    Followers,
}

impl ProfileField {
    pub fn all() -> &'static [ProfileField] {
        &[
            Self::FullName,
            Self::Headline,
            Self::CurrentPosition,
            Self::Company,
            Self::Location,
            Self::AboutSection,
            Self::ProfilePictureUrl,
            Self::Connections,
            Self::Followers,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FullName => "full_name",
            Self::Headline => "headline",
            Self::CurrentPosition => "current_position",
            Self::Company => "company",
            Self::Location => "location",
            Self::AboutSection => "about_section",
            Self::ProfilePictureUrl => "profile_picture_url",
            Self::Connections => "connections",
            Self::Followers => "followers",
        }
    }
}

impl std::fmt::Display for ProfileField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Scraped profile mapping. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
}

impl ProfileData {
    pub fn get(&self, field: ProfileField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        *self.slot_mut(field) = Some(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    pub fn field_count(&self) -> usize {
        ProfileField::all()
            .iter()
            .filter(|f| self.slot(**f).is_some())
            .count()
    }

    fn slot(&self, field: ProfileField) -> &Option<String> {
        match field {
            ProfileField::FullName => &self.full_name,
            ProfileField::Headline => &self.headline,
            ProfileField::CurrentPosition => &self.current_position,
            ProfileField::Company => &self.company,
            ProfileField::Location => &self.location,
            ProfileField::AboutSection => &self.about_section,
            ProfileField::ProfilePictureUrl => &self.profile_picture_url,
            ProfileField::Connections => &self.connections,
            ProfileField::Followers => &self.followers,
        }
    }

    fn slot_mut(&mut self, field: ProfileField) -> &mut Option<String> {
        match field {
            ProfileField::FullName => &mut self.full_name,
            ProfileField::Headline => &mut self.headline,
            ProfileField::CurrentPosition => &mut self.current_position,
            ProfileField::Company => &mut self.company,
            ProfileField::Location => &mut self.location,
            ProfileField::AboutSection => &mut self.about_section,
            ProfileField::ProfilePictureUrl => &mut self.profile_picture_url,
            ProfileField::Connections => &mut self.connections,
            ProfileField::Followers => &mut self.followers,
        }
    }
}

/// Structured failure captured from a save attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub kind: Option<String>,
}

impl ExtractionFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            status: None,
            kind: None,
        }
    }
}

impl From<&Error> for ExtractionFailure {
    fn from(err: &Error) -> Self {
        match err {
            Error::Backend { status, .. } => Self {
                status: Some(*status),
                ..Self::new(err.to_string())
            },
            Error::Http(_) => Self {
                kind: Some("network_error".into()),
                ..Self::new(err.to_string())
            },
            other => Self::new(other.to_string()),
        }
    }
}

/// Extraction state as persisted in the shared store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionRecord {
    pub status: ExtractionStatus,
    pub data: Option<ProfileData>,
    pub error: Option<ExtractionFailure>,
    /// Epoch milliseconds of the last status write.
    pub last_extraction: Option<i64>,
}

impl ExtractionRecord {
    /// Whether the record has outlived the retention window at `now_ms`.
    pub fn is_stale(&self, now_ms: i64, retention: Duration) -> bool {
        match self.last_extraction {
            Some(at) => now_ms.saturating_sub(at) > retention.as_millis() as i64,
            None => false,
        }
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
