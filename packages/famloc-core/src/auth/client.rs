//! Bearer-token authentication with optional second-factor step-up.
//!
//! `POST {endpoint}/auth` answers either with a plain-text token or with JSON
//! `{token, needTfa, setupTfa}`. When `needTfa` is set the token is only a
//! provisional one until `POST {endpoint}/tfaVerify` accepts a 6-digit code.

use super::session::{AuthSession, AuthState};
use crate::config::{Credentials, join_url, normalize_endpoint};
use crate::error::AuthError;
use serde::{Deserialize, Serialize};

/// Required length of a second-factor code.
const SECOND_FACTOR_CODE_LEN: usize = 6;

/// Result of a successful exchange with the authentication endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A bearer token is now held.
    Authenticated,
    /// A code must be passed to [`AuthClient::verify_second_factor`].
    SecondFactorRequired,
    /// The account must enroll a second factor through the web dashboard.
    SecondFactorSetupRequired,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    user: &'a str,
    pass: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    need_tfa: bool,
    #[serde(default)]
    setup_tfa: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TfaVerifyRequest<'a> {
    user_id: &'a str,
    code: &'a str,
    bearer: &'a str,
}

#[derive(Debug, Deserialize)]
struct TfaVerifyResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// How an auth response body should be interpreted.
#[derive(Debug, PartialEq, Eq)]
enum ParsedAuth {
    Token(String),
    SecondFactor(String),
    SetupRequired,
}

fn parse_auth_response(body: &str) -> Result<ParsedAuth, AuthError> {
    let body = body.trim();

    if let Ok(resp) = serde_json::from_str::<AuthResponse>(body) {
        if resp.need_tfa {
            if resp.token.is_empty() {
                return Err(AuthError::EmptyToken);
            }
            return Ok(ParsedAuth::SecondFactor(resp.token));
        }
        if resp.setup_tfa {
            return Ok(ParsedAuth::SetupRequired);
        }
        if resp.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        return Ok(ParsedAuth::Token(resp.token));
    }

    // Plain-text token, possibly JSON-quoted
    let token = serde_json::from_str::<String>(body).unwrap_or_else(|_| body.to_string());
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    Ok(ParsedAuth::Token(token.to_string()))
}

/// Client side of the authentication protocol. Performs no retries.
#[derive(Debug)]
pub struct AuthClient {
    http: reqwest::Client,
    auth_url: String,
    tfa_url: String,
    credentials: Credentials,
    session: AuthSession,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        let endpoint = normalize_endpoint(endpoint);
        Self {
            http,
            auth_url: join_url(&endpoint, "/auth"),
            tfa_url: join_url(&endpoint, "/tfaVerify"),
            credentials: Credentials::default(),
            session: AuthSession::default(),
        }
    }

    /// Seed the last-known credentials used by [`AuthClient::reauthenticate`].
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn state(&self) -> AuthState {
        self.session.state()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.session.bearer_token()
    }

    /// Username of the last authentication attempt.
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Exchange credentials for a bearer token.
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<AuthOutcome, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        self.credentials = Credentials::new(username, password);
        self.session.clear();

        tracing::debug!("Authenticating {} at {}", username, self.auth_url);

        let resp = self
            .http
            .post(&self.auth_url)
            .json(&AuthRequest {
                user: username,
                pass: password,
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if status != reqwest::StatusCode::OK {
            tracing::warn!("Authentication rejected with status {}", status);
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        match parse_auth_response(&body)? {
            ParsedAuth::Token(token) => {
                self.session.authenticated(token);
                tracing::info!("Authentication successful");
                Ok(AuthOutcome::Authenticated)
            }
            ParsedAuth::SecondFactor(pending) => {
                self.session.await_second_factor(pending);
                tracing::info!("Second-factor verification required");
                Ok(AuthOutcome::SecondFactorRequired)
            }
            ParsedAuth::SetupRequired => {
                tracing::warn!("Account requires second-factor enrollment via the web dashboard");
                Ok(AuthOutcome::SecondFactorSetupRequired)
            }
        }
    }

    /// Complete a pending second-factor challenge with a 6-digit code.
    ///
    /// A failed verification keeps the challenge pending so another code can
    /// be tried.
    pub async fn verify_second_factor(&mut self, code: &str) -> Result<(), AuthError> {
        let pending = self
            .session
            .pending_token()
            .ok_or(AuthError::NotPending)?
            .to_string();

        let code = code.trim();
        if code.chars().count() != SECOND_FACTOR_CODE_LEN {
            return Err(AuthError::InvalidCode);
        }

        let resp = self
            .http
            .post(&self.tfa_url)
            .json(&TfaVerifyRequest {
                user_id: &self.credentials.username,
                code,
                bearer: &pending,
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            tracing::warn!("Second-factor verification rejected with status {}", status);
            return Err(AuthError::Verification(format!(
                "server returned {}: {}",
                status,
                body.trim()
            )));
        }

        let verdict: TfaVerifyResponse = serde_json::from_str(&body).map_err(|_| {
            AuthError::Verification(format!("unexpected response ({}): {}", status, body.trim()))
        })?;

        if !verdict.ok {
            let message = verdict
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "invalid verification code".to_string());
            return Err(AuthError::Verification(message));
        }

        self.session.promote_pending();
        tracing::info!("Second-factor verification successful");
        Ok(())
    }

    /// Authenticate again with the last-known credentials.
    pub async fn reauthenticate(&mut self) -> Result<AuthOutcome, AuthError> {
        let Credentials { username, password } = self.credentials.clone();
        tracing::info!("Re-authenticating as {}", username);
        self.authenticate(&username, &password).await
    }

    /// Drop any held or pending token.
    pub fn invalidate(&mut self) {
        self.session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AuthClient {
        AuthClient::new(reqwest::Client::new(), &server.uri())
    }

    async fn mount_auth(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_json(json!({"user": "fam", "pass": "pw"})))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn parses_response_shapes() {
        assert_eq!(
            parse_auth_response("tok123\n").unwrap(),
            ParsedAuth::Token("tok123".to_string())
        );
        assert_eq!(
            parse_auth_response("\"quoted\"").unwrap(),
            ParsedAuth::Token("quoted".to_string())
        );
        assert_eq!(
            parse_auth_response(r#"{"token":"abc"}"#).unwrap(),
            ParsedAuth::Token("abc".to_string())
        );
        assert_eq!(
            parse_auth_response(r#"{"token":"p","needTfa":true}"#).unwrap(),
            ParsedAuth::SecondFactor("p".to_string())
        );
        assert_eq!(
            parse_auth_response(r#"{"setupTfa":true}"#).unwrap(),
            ParsedAuth::SetupRequired
        );
        assert!(matches!(parse_auth_response("  "), Err(AuthError::EmptyToken)));
        assert!(matches!(parse_auth_response("{}"), Err(AuthError::EmptyToken)));
        assert!(matches!(
            parse_auth_response(r#"{"needTfa":true}"#),
            Err(AuthError::EmptyToken)
        ));
    }

    #[tokio::test]
    async fn plain_token_authenticates() {
        let server = MockServer::start().await;
        mount_auth(&server, ResponseTemplate::new(200).set_body_string("tok123")).await;

        let mut client = client_for(&server);
        let outcome = client.authenticate("fam", "pw").await.unwrap();

        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(client.state(), AuthState::Authenticated);
        assert_eq!(client.bearer_token(), Some("tok123"));
    }

    #[tokio::test]
    async fn non_ok_status_is_rejected_with_body() {
        let server = MockServer::start().await;
        mount_auth(&server, ResponseTemplate::new(401).set_body_string("bad password")).await;

        let mut client = client_for(&server);
        let err = client.authenticate("fam", "pw").await.unwrap_err();

        assert!(matches!(err, AuthError::Rejected { status: 401, ref body } if body == "bad password"));
        assert_eq!(client.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn missing_credentials_fail_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("tok"))
            .expect(0)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        assert!(matches!(
            client.authenticate("fam", "").await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn setup_required_is_signalled() {
        let server = MockServer::start().await;
        mount_auth(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token": "", "setupTfa": true})),
        )
        .await;

        let mut client = client_for(&server);
        let outcome = client.authenticate("fam", "pw").await.unwrap();

        assert_eq!(outcome, AuthOutcome::SecondFactorSetupRequired);
        assert_eq!(client.bearer_token(), None);
    }

    #[tokio::test]
    async fn second_factor_flow_promotes_pending_token() {
        let server = MockServer::start().await;
        mount_auth(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token": "pending-tok", "needTfa": true})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/tfaVerify"))
            .and(body_json(json!({"userId": "fam", "code": "123456", "bearer": "pending-tok"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let outcome = client.authenticate("fam", "pw").await.unwrap();
        assert_eq!(outcome, AuthOutcome::SecondFactorRequired);
        assert_eq!(client.state(), AuthState::AwaitingSecondFactor);
        assert_eq!(client.bearer_token(), None);

        client.verify_second_factor(" 123456 ").await.unwrap();
        assert_eq!(client.state(), AuthState::Authenticated);
        assert_eq!(client.bearer_token(), Some("pending-tok"));
    }

    #[tokio::test]
    async fn wrong_length_code_fails_without_network_call() {
        let server = MockServer::start().await;
        mount_auth(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token": "pending-tok", "needTfa": true})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/tfaVerify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(0)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client.authenticate("fam", "pw").await.unwrap();

        for code in ["12345", "1234567", ""] {
            assert!(matches!(
                client.verify_second_factor(code).await,
                Err(AuthError::InvalidCode)
            ));
        }
        assert_eq!(client.state(), AuthState::AwaitingSecondFactor);
    }

    #[tokio::test]
    async fn rejected_code_keeps_challenge_pending() {
        let server = MockServer::start().await;
        mount_auth(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token": "pending-tok", "needTfa": true})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/tfaVerify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "code expired"})),
            )
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client.authenticate("fam", "pw").await.unwrap();

        let err = client.verify_second_factor("000000").await.unwrap_err();
        assert!(matches!(err, AuthError::Verification(ref msg) if msg == "code expired"));
        assert_eq!(client.state(), AuthState::AwaitingSecondFactor);
        assert_eq!(client.bearer_token(), None);
    }

    #[tokio::test]
    async fn error_status_never_promotes_pending_token() {
        let server = MockServer::start().await;
        mount_auth(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token": "pending-tok", "needTfa": true})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/tfaVerify"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client.authenticate("fam", "pw").await.unwrap();

        let err = client.verify_second_factor("123456").await.unwrap_err();
        assert!(matches!(err, AuthError::Verification(ref msg) if msg.contains("500")));
        assert_eq!(client.state(), AuthState::AwaitingSecondFactor);
        assert_eq!(client.bearer_token(), None);
    }

    #[tokio::test]
    async fn verify_without_challenge_is_not_pending() {
        let server = MockServer::start().await;
        let mut client = client_for(&server);
        assert!(matches!(
            client.verify_second_factor("123456").await,
            Err(AuthError::NotPending)
        ));
    }

    #[tokio::test]
    async fn reauthenticate_reuses_last_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_json(json!({"user": "fam", "pass": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh-tok"))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client.authenticate("fam", "pw").await.unwrap();
        let outcome = client.reauthenticate().await.unwrap();

        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(client.bearer_token(), Some("fresh-tok"));
        assert_eq!(client.username(), "fam");
    }

    #[tokio::test]
    async fn invalidate_drops_token() {
        let server = MockServer::start().await;
        mount_auth(&server, ResponseTemplate::new(200).set_body_string("tok123")).await;

        let mut client = client_for(&server);
        client.authenticate("fam", "pw").await.unwrap();
        client.invalidate();
        assert_eq!(client.state(), AuthState::Unauthenticated);
        assert_eq!(client.bearer_token(), None);
    }
}
