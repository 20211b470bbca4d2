//! Request and response bodies of the `/extension/*` endpoints.

use inlink_core::ProfileData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SendOtpRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOtpRequest<'a> {
    pub email: &'a str,
    pub otp: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SendOtpResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VerifyOtpResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Scraped fields plus the page they were taken from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSubmission {
    #[serde(flatten)]
    pub profile: ProfileData,
    pub linkedin_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SaveProfileResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    #[serde(rename = "userEmail")]
    pub user_email: Option<String>,
    #[serde(rename = "extensionVersion")]
    pub extension_version: String,
}
