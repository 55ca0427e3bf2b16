//! Conformance checks against a running service.
//!
//! Each step drives the real HTTP surface, either through a
//! [`SessionManager`] or with raw requests, and records PASS or FAIL.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, header};
use serde_json::json;
use tracing::debug;

use crate::client::{
    ClientConfig, ClientError, MemoryStorage, SessionManager, SessionStatus,
};
use crate::protocol::{ErrorBody, LOGIN_PATH, PROFILE_PATH, REFRESH_PATH, TokenPairResponse};

const CONCURRENT_REQUESTS: usize = 5;
const DISALLOWED_ORIGIN: &str = "http://disallowed.invalid";

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub base_url: String,
    pub email: String,
    pub password: String,
    /// An origin the service allows
    pub origin: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: Option<String>,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        match &self.detail {
            Some(detail) => write!(f, "{} {}: {}", verdict, self.name, detail),
            None => write!(f, "{} {}", verdict, self.name),
        }
    }
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub steps: Vec<StepResult>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.passed)
    }

    fn record(&mut self, name: &'static str, outcome: Result<(), String>) {
        let step = match outcome {
            Ok(()) => StepResult {
                name,
                passed: true,
                detail: None,
            },
            Err(detail) => StepResult {
                name,
                passed: false,
                detail: Some(detail),
            },
        };
        debug!(step = %step, "Check finished");
        self.steps.push(step);
    }
}

struct Checker {
    options: CheckOptions,
    base_url: String,
    http: reqwest::Client,
}

/// Run every check in order. Later steps still run after a failure.
pub async fn run_checks(options: &CheckOptions) -> CheckReport {
    let mut report = CheckReport::default();

    let http = match reqwest::Client::builder().timeout(options.timeout).build() {
        Ok(http) => http,
        Err(e) => {
            report.record("build http client", Err(e.to_string()));
            return report;
        }
    };
    let checker = Checker {
        options: options.clone(),
        base_url: options.base_url.trim_end_matches('/').to_string(),
        http,
    };

    report.record("service reachable", checker.service_reachable().await);
    report.record("wrong password rejected", checker.wrong_password().await);
    report.record("login issues pair", checker.login_issues_pair().await);
    report.record("profile requires bearer", checker.profile_requires_bearer().await);
    report.record("rotation consumes refresh token", checker.rotation().await);
    report.record("missing refresh token", checker.missing_refresh_token().await);
    report.record("disallowed origin rejected", checker.disallowed_origin().await);
    report.record("allowed origin preflight", checker.allowed_preflight().await);
    report.record(
        "concurrent 401s share one renewal",
        checker.single_flight().await,
    );
    report.record("logout clears session", checker.logout_clears().await);

    report
}

fn expect_status(actual: StatusCode, expected: StatusCode) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {}, got {}", expected, actual))
    }
}

fn expect_message(body: &str, expected: &str) -> Result<(), String> {
    let parsed: ErrorBody =
        serde_json::from_str(body).map_err(|e| format!("error body not JSON: {}", e))?;
    if parsed.message == expected {
        Ok(())
    } else {
        Err(format!("expected message '{}', got '{}'", expected, parsed.message))
    }
}

fn describe(e: impl fmt::Display) -> String {
    e.to_string()
}

impl Checker {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session(&self) -> Result<SessionManager, String> {
        let config = ClientConfig {
            base_url: self.base_url.clone(),
            timeout: self.options.timeout,
        };
        SessionManager::new(config, Arc::new(MemoryStorage::new())).map_err(describe)
    }

    async fn login_pair(&self) -> Result<TokenPairResponse, String> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(&json!({ "email": self.options.email, "password": self.options.password }))
            .send()
            .await
            .map_err(describe)?;
        expect_status(response.status(), StatusCode::OK)?;
        response.json().await.map_err(describe)
    }

    async fn service_reachable(&self) -> Result<(), String> {
        let response = self.http.get(self.url("/")).send().await.map_err(describe)?;
        expect_status(response.status(), StatusCode::OK)
    }

    async fn wrong_password(&self) -> Result<(), String> {
        let session = self.session()?;
        let password = format!("{}-wrong", self.options.password);
        match session.login(&self.options.email, &password).await {
            Err(ClientError::Http { status: 401, message }) => {
                if session.state().reason.as_deref() != Some(message.as_str()) {
                    return Err("rejection message not recorded as reason".to_string());
                }
                if session.cache().has_refresh_token() {
                    return Err("failed login stored a refresh token".to_string());
                }
                Ok(())
            }
            Err(e) => Err(format!("unexpected error: {}", e)),
            Ok(_) => Err("login with a wrong password succeeded".to_string()),
        }
    }

    async fn login_issues_pair(&self) -> Result<(), String> {
        let session = self.session()?;
        let profile = session
            .login(&self.options.email, &self.options.password)
            .await
            .map_err(describe)?;

        if session.status() != SessionStatus::Authenticated {
            return Err(format!("status is {:?} after login", session.status()));
        }
        if !session.cache().has_refresh_token() {
            return Err("refresh token not stored".to_string());
        }
        if session.access_expires_at().is_none() {
            return Err("access token expiry unreadable".to_string());
        }

        let fetched = session.fetch_profile().await.map_err(describe)?;
        if fetched != profile {
            return Err("profile differs from login response".to_string());
        }
        Ok(())
    }

    async fn profile_requires_bearer(&self) -> Result<(), String> {
        let response = self
            .http
            .get(self.url(PROFILE_PATH))
            .send()
            .await
            .map_err(describe)?;
        expect_status(response.status(), StatusCode::UNAUTHORIZED)?;
        expect_message(&response.text().await.map_err(describe)?, "Missing access token")?;

        let response = self
            .http
            .get(self.url(PROFILE_PATH))
            .bearer_auth("not-a-token")
            .send()
            .await
            .map_err(describe)?;
        expect_status(response.status(), StatusCode::UNAUTHORIZED)?;
        expect_message(
            &response.text().await.map_err(describe)?,
            "Access token expired or invalid",
        )
    }

    async fn rotation(&self) -> Result<(), String> {
        let pair = self.login_pair().await?;
        let original = pair
            .refresh_token
            .ok_or_else(|| "login response has no refresh token".to_string())?;

        let response = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&json!({ "refreshToken": original }))
            .send()
            .await
            .map_err(describe)?;
        expect_status(response.status(), StatusCode::OK)?;
        let rotated: TokenPairResponse = response.json().await.map_err(describe)?;
        if rotated.refresh_token.as_deref() == Some(original.as_str()) {
            return Err("rotation returned the same refresh token".to_string());
        }

        let replay = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&json!({ "refreshToken": original }))
            .send()
            .await
            .map_err(describe)?;
        expect_status(replay.status(), StatusCode::UNAUTHORIZED)?;
        expect_message(&replay.text().await.map_err(describe)?, "Unknown refresh token")
    }

    async fn missing_refresh_token(&self) -> Result<(), String> {
        let response = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&json!({}))
            .send()
            .await
            .map_err(describe)?;
        expect_status(response.status(), StatusCode::BAD_REQUEST)?;
        expect_message(
            &response.text().await.map_err(describe)?,
            "Refresh token is required",
        )
    }

    async fn disallowed_origin(&self) -> Result<(), String> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .header(header::ORIGIN, DISALLOWED_ORIGIN)
            .json(&json!({ "email": self.options.email, "password": self.options.password }))
            .send()
            .await
            .map_err(describe)?;
        expect_status(response.status(), StatusCode::FORBIDDEN)
    }

    async fn allowed_preflight(&self) -> Result<(), String> {
        let response = self
            .http
            .request(reqwest::Method::OPTIONS, self.url(LOGIN_PATH))
            .header(header::ORIGIN, &self.options.origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .send()
            .await
            .map_err(describe)?;

        let allowed = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok());
        if allowed != Some(self.options.origin.as_str()) {
            return Err(format!("allow-origin header was {:?}", allowed));
        }
        let credentials = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok());
        if credentials != Some("true") {
            return Err("credentials not allowed".to_string());
        }
        Ok(())
    }

    /// A stale access token on several concurrent requests must lead to a
    /// single rotation. Two rotations of the same refresh token would make
    /// one of them fail and end the session.
    async fn single_flight(&self) -> Result<(), String> {
        let session = self.session()?;
        session
            .login(&self.options.email, &self.options.password)
            .await
            .map_err(describe)?;
        let before = session.cache().refresh_token().map_err(describe)?;

        session.cache().set_access_token("stale-access-token");

        let client = session.client();
        let results =
            futures::future::join_all((0..CONCURRENT_REQUESTS).map(|_| {
                client.get_json::<crate::protocol::UserProfile>(PROFILE_PATH)
            }))
            .await;

        for result in results {
            result.map_err(describe)?;
        }
        if session.status() != SessionStatus::Authenticated {
            return Err("session ended during concurrent renewal".to_string());
        }
        if session.cache().refresh_token().map_err(describe)? == before {
            return Err("refresh token was not rotated".to_string());
        }
        Ok(())
    }

    async fn logout_clears(&self) -> Result<(), String> {
        let session = self.session()?;
        session
            .login(&self.options.email, &self.options.password)
            .await
            .map_err(describe)?;

        session.logout(None);
        session.logout(None);

        if session.status() != SessionStatus::Anonymous {
            return Err(format!("status is {:?} after logout", session.status()));
        }
        if session.cache().access_token().is_some() || session.cache().has_refresh_token() {
            return Err("tokens survived logout".to_string());
        }
        if !session.cache().storage().keys().map_err(describe)?.is_empty() {
            return Err("durable storage not empty after logout".to_string());
        }
        Ok(())
    }
}
