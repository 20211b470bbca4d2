//! HTTP client for the extension backend.

use async_trait::async_trait;
use inlink_core::{Error, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::types::*;

#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Ask the backend to e-mail a one-time code.
    async fn send_otp(&self, email: &str) -> Result<SendOtpResponse>;

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<VerifyOtpResponse>;

    /// Submit scraped fields. Non-2xx responses are `Error::Backend`.
    async fn save_profile(
        &self,
        token: &str,
        submission: &ProfileSubmission,
    ) -> Result<SaveProfileResponse>;

    async fn request_approval(&self, token: &str, request: &ApprovalRequest) -> Result<()>;
}

/// `reqwest`-backed implementation.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
        extra: Option<(&str, &str)>,
    ) -> Result<Response> {
        let url = self.url(path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some((name, value)) = extra {
            request = request.header(name, value);
        }

        request.send().await.map_err(|e| {
            error!("Request to {} failed: {}", url, e);
            Error::Http(e.to_string())
        })
    }
}

/// Decode a JSON body. The login endpoints report failures in the body, so
/// a non-2xx status only becomes an error when the body is not JSON.
async fn decode_lenient<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    match serde_json::from_str(&body) {
        Ok(parsed) => Ok(parsed),
        Err(_) if !status.is_success() => Err(backend_error(status, body)),
        Err(e) => Err(Error::Json(e)),
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(backend_error(status, body))
}

fn backend_error(status: StatusCode, body: String) -> Error {
    Error::Backend {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn send_otp(&self, email: &str) -> Result<SendOtpResponse> {
        let response = self
            .post("/extension/send-otp", None, &SendOtpRequest { email }, None)
            .await?;
        decode_lenient(response).await
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<VerifyOtpResponse> {
        let response = self
            .post(
                "/extension/verify-otp",
                None,
                &VerifyOtpRequest { email, otp },
                None,
            )
            .await?;
        decode_lenient(response).await
    }

    async fn save_profile(
        &self,
        token: &str,
        submission: &ProfileSubmission,
    ) -> Result<SaveProfileResponse> {
        let response = self
            .post(
                "/extension/save-profile",
                Some(token),
                submission,
                Some(("X-LinkedIn-URL", submission.linkedin_url.as_str())),
            )
            .await?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid response body: {}", e)))
    }

    async fn request_approval(&self, token: &str, request: &ApprovalRequest) -> Result<()> {
        let response = self
            .post("/extension/request-approval", Some(token), request, None)
            .await?;
        ensure_success(response).await.map(|_| ())
    }
}
