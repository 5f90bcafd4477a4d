//! Bearer credentials for the signed-in user.
//!
//! The provider never keeps its own token store: the only cached token lives
//! in the caller's [`AuthSession`], so signing out drops it at once. Each
//! acquisition either returns a usable [`Credential`] or resolves to
//! [`CredentialOutcome::Unauthenticated`]; nothing on this path returns an
//! error to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use dirpilot_core::config::CredentialConfig;
use dirpilot_core::Credential;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Identity of the user a session acts for.
#[derive(Clone, Default)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub login_hint: Option<String>,
    pub refresh_token: Option<SecretString>,
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext")
            .field("user_id", &self.user_id)
            .field("login_hint", &self.login_hint)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Per-session authentication handle.
#[derive(Clone, Debug, Default)]
pub struct AuthSession {
    signed_in: bool,
    user: UserContext,
    access_token: Option<SecretString>,
}

impl AuthSession {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(user: UserContext, access_token: Option<String>) -> Self {
        Self { signed_in: true, user, access_token: access_token.map(SecretString::from) }
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn has_cached_token(&self) -> bool {
        self.access_token.is_some()
    }

    /// Drops every token held for the user.
    pub fn sign_out(&mut self) {
        self.signed_in = false;
        self.access_token = None;
        self.user.refresh_token = None;
    }

    fn store(&mut self, token: &AcquiredToken) {
        self.access_token = Some(token.access_token.clone());
        if let Some(refresh_token) = &token.refresh_token {
            self.user.refresh_token = Some(refresh_token.clone());
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("interactive sign-in required: {0}")]
    ReauthRequired(String),
    #[error("token acquisition failed: {0}")]
    Transient(String),
}

#[derive(Clone)]
pub struct AcquiredToken {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AcquiredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredToken")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(
        &self,
        scopes: &[String],
        user: &UserContext,
    ) -> Result<AcquiredToken, TokenError>;
}

/// Serves one fixed token. Once it has expired the user must sign in again.
pub struct StaticTokenSource {
    token: SecretString,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: SecretString::from(token.into()) }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire(
        &self,
        _scopes: &[String],
        _user: &UserContext,
    ) -> Result<AcquiredToken, TokenError> {
        let expires_at = decode_expiry(self.token.expose_secret());
        if expires_at.is_some_and(|expiry| expiry <= Utc::now()) {
            return Err(TokenError::ReauthRequired(
                "the configured session token has expired".to_string(),
            ));
        }
        Ok(AcquiredToken { access_token: self.token.clone(), refresh_token: None, expires_at })
    }
}

/// OAuth2 refresh-token grant against a token endpoint.
pub struct OAuthRefreshTokenSource {
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<SecretString>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

impl OAuthRefreshTokenSource {
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
        timeout: StdDuration,
    ) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                TokenError::Transient(format!("failed to build token client: {error}"))
            })?;
        Ok(Self {
            client,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret,
        })
    }
}

#[async_trait]
impl TokenSource for OAuthRefreshTokenSource {
    async fn acquire(
        &self,
        scopes: &[String],
        user: &UserContext,
    ) -> Result<AcquiredToken, TokenError> {
        let Some(refresh_token) = user.refresh_token.as_ref() else {
            return Err(TokenError::ReauthRequired("no refresh token in session".to_string()));
        };

        let scope = scopes.join(" ");
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }

        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|error| {
                TokenError::Transient(format!("token endpoint request failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<TokenErrorResponse>().await.unwrap_or_default();
            let code = body.error.unwrap_or_default();
            let detail = body
                .error_description
                .unwrap_or_else(|| format!("token endpoint returned {status}"));
            return Err(match code.as_str() {
                "invalid_grant" | "interaction_required" => {
                    TokenError::ReauthRequired(format!("{code}: {detail}"))
                }
                _ => TokenError::Transient(format!("{status}: {detail}")),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|error| {
                TokenError::Transient(format!("failed to decode token response: {error}"))
            })?;
        if token.access_token.trim().is_empty() {
            return Err(TokenError::Transient(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        let expires_at =
            decode_expiry(&token.access_token).or_else(|| token.expires_in.and_then(expiry_after));
        Ok(AcquiredToken {
            access_token: SecretString::from(token.access_token),
            refresh_token: token.refresh_token.map(SecretString::from),
            expires_at,
        })
    }
}

#[derive(Clone, Debug)]
pub enum CredentialOutcome {
    Ready(Credential),
    Unauthenticated { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    SignedOut,
    Valid { expires_at: Option<DateTime<Utc>> },
    NeedsRefresh { expires_at: Option<DateTime<Utc>> },
    NeedsSignIn { reason: String },
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignedOut => "signed_out",
            Self::Valid { .. } => "valid",
            Self::NeedsRefresh { .. } => "needs_refresh",
            Self::NeedsSignIn { .. } => "needs_sign_in",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedOut => write!(f, "Not signed in."),
            Self::Valid { expires_at: Some(expiry) } => {
                write!(f, "Signed in; token valid until {}.", expiry.to_rfc3339())
            }
            Self::Valid { expires_at: None } => {
                write!(f, "Signed in; token expiry unknown, treated as valid.")
            }
            Self::NeedsRefresh { .. } => {
                write!(f, "Signed in; token will be refreshed on the next call.")
            }
            Self::NeedsSignIn { reason } => {
                write!(f, "Session expired; please sign in again ({reason}).")
            }
        }
    }
}

pub struct CredentialProvider {
    source: Arc<dyn TokenSource>,
    scopes: Vec<String>,
    expiry_margin: Duration,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn TokenSource>, scopes: Vec<String>, expiry_margin: Duration) -> Self {
        Self { source, scopes, expiry_margin }
    }

    pub fn from_config(source: Arc<dyn TokenSource>, config: &CredentialConfig) -> Self {
        let margin = i64::try_from(config.expiry_margin_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::minutes(5));
        Self::new(source, config.scopes.clone(), margin)
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub async fn acquire(&self, session: &mut AuthSession) -> CredentialOutcome {
        self.acquire_at(session, Utc::now()).await
    }

    pub async fn acquire_at(
        &self,
        session: &mut AuthSession,
        now: DateTime<Utc>,
    ) -> CredentialOutcome {
        if !session.is_signed_in() {
            return CredentialOutcome::Unauthenticated {
                reason: "no user is signed in".to_string(),
            };
        }

        if let Some(token) = &session.access_token {
            let expires_at = decode_expiry(token.expose_secret());
            if self.is_fresh(expires_at, now) {
                debug!(
                    event_name = "client.credential.cached",
                    expires_at = ?expires_at,
                    "using session token"
                );
                let credential = Credential::new(token.expose_secret().to_string(), expires_at);
                return CredentialOutcome::Ready(credential);
            }
            debug!(
                event_name = "client.credential.expiring",
                expires_at = ?expires_at,
                "session token inside expiry margin"
            );
        }

        match self.source.acquire(&self.scopes, session.user()).await {
            Ok(token) if token.expires_at.is_some_and(|expiry| expiry <= now) => {
                warn!(
                    event_name = "client.credential.stale",
                    "token source returned an already expired token"
                );
                CredentialOutcome::Unauthenticated {
                    reason: "token source returned an expired token".to_string(),
                }
            }
            Ok(token) => {
                info!(
                    event_name = "client.credential.acquired",
                    token_len = token.access_token.expose_secret().len(),
                    expires_at = ?token.expires_at,
                    "acquired fresh token"
                );
                session.store(&token);
                let secret = token.access_token.expose_secret().to_string();
                CredentialOutcome::Ready(Credential::new(secret, token.expires_at))
            }
            Err(TokenError::ReauthRequired(reason)) => {
                warn!(
                    event_name = "client.credential.reauth_required",
                    reason = %reason,
                    "sign-in required"
                );
                session.sign_out();
                CredentialOutcome::Unauthenticated { reason }
            }
            Err(TokenError::Transient(reason)) => {
                warn!(
                    event_name = "client.credential.transient_failure",
                    reason = %reason,
                    "token acquisition failed"
                );
                CredentialOutcome::Unauthenticated { reason }
            }
        }
    }

    pub fn status(&self, session: &AuthSession) -> AuthStatus {
        self.status_at(session, Utc::now())
    }

    pub fn status_at(&self, session: &AuthSession, now: DateTime<Utc>) -> AuthStatus {
        if !session.is_signed_in() {
            return AuthStatus::SignedOut;
        }

        let expires_at =
            session.access_token.as_ref().and_then(|token| decode_expiry(token.expose_secret()));
        if session.has_cached_token() && self.is_fresh(expires_at, now) {
            return AuthStatus::Valid { expires_at };
        }
        if session.user().refresh_token.is_some() {
            return AuthStatus::NeedsRefresh { expires_at };
        }
        match expires_at {
            Some(expiry) => AuthStatus::NeedsSignIn {
                reason: format!("token expired at {}", expiry.to_rfc3339()),
            },
            None => AuthStatus::NeedsRefresh { expires_at: None },
        }
    }

    /// Unknown expiry counts as fresh; the remote service has the last word.
    fn is_fresh(&self, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match expires_at {
            Some(expiry) => expiry - now >= self.expiry_margin,
            None => true,
        }
    }
}

/// `None` when `expires_in` cannot be represented; the expiry is then unknown.
fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|delta| Utc::now().checked_add_signed(delta))
}

/// Reads the `exp` claim of a JWT without verifying its signature.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let seconds = exp.as_i64().or_else(|| exp.as_f64().map(|value| value as i64))?;
    DateTime::from_timestamp(seconds, 0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use chrono::{DateTime, Duration, Utc};
    use secrecy::SecretString;

    use super::{
        decode_expiry, AcquiredToken, AuthSession, AuthStatus, CredentialOutcome,
        CredentialProvider, TokenError, TokenSource, UserContext,
    };

    fn jwt_expiring_at(expiry: DateTime<Utc>) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = format!(r#"{{"sub":"user-1","exp":{}}}"#, expiry.timestamp());
        let payload = URL_SAFE_NO_PAD.encode(claims);
        format!("{header}.{payload}.signature")
    }

    struct CountingSource {
        calls: AtomicUsize,
        outcome: Result<String, TokenError>,
    }

    impl CountingSource {
        fn returning(token: String) -> Self {
            Self { calls: AtomicUsize::new(0), outcome: Ok(token) }
        }

        fn failing(error: TokenError) -> Self {
            Self { calls: AtomicUsize::new(0), outcome: Err(error) }
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn acquire(
            &self,
            _scopes: &[String],
            _user: &UserContext,
        ) -> Result<AcquiredToken, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let token = self.outcome.clone()?;
            let expires_at = decode_expiry(&token);
            Ok(AcquiredToken {
                access_token: SecretString::from(token),
                refresh_token: None,
                expires_at,
            })
        }
    }

    fn provider(source: Arc<CountingSource>) -> CredentialProvider {
        let scopes = vec!["https://graph.microsoft.com/.default".to_string()];
        CredentialProvider::new(source, scopes, Duration::minutes(5))
    }

    #[test]
    fn decodes_exp_claim() {
        let expiry = DateTime::from_timestamp(1_900_000_000, 0).expect("valid timestamp");
        assert_eq!(decode_expiry(&jwt_expiring_at(expiry)), Some(expiry));
        assert_eq!(decode_expiry("opaque-token"), None);
        assert_eq!(decode_expiry("a.!!!.c"), None);
    }

    #[tokio::test]
    async fn fresh_cached_token_is_reused() {
        let now = Utc::now();
        let source = Arc::new(CountingSource::returning("unused".to_string()));
        let provider = provider(source.clone());
        let token = jwt_expiring_at(now + Duration::minutes(30));
        let mut session = AuthSession::signed_in(UserContext::default(), Some(token));

        let outcome = provider.acquire_at(&mut session, now).await;

        assert!(matches!(outcome, CredentialOutcome::Ready(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_inside_margin_is_refreshed() {
        let now = Utc::now();
        let replacement = jwt_expiring_at(now + Duration::hours(1));
        let source = Arc::new(CountingSource::returning(replacement));
        let provider = provider(source.clone());
        let token = jwt_expiring_at(now + Duration::minutes(4));
        let mut session = AuthSession::signed_in(UserContext::default(), Some(token));

        let outcome = provider.acquire_at(&mut session, now).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        match outcome {
            CredentialOutcome::Ready(credential) => {
                let expires_at = credential.expires_at.expect("refreshed token has an expiry");
                assert!(expires_at - now > Duration::minutes(55));
            }
            CredentialOutcome::Unauthenticated { reason } => {
                panic!("expected a credential, got {reason}")
            }
        }
    }

    #[tokio::test]
    async fn exactly_five_minutes_left_is_still_valid() {
        let now = Utc::now();
        let source = Arc::new(CountingSource::returning("unused".to_string()));
        let provider = provider(source.clone());
        let expiry = DateTime::from_timestamp((now + Duration::minutes(5)).timestamp(), 0)
            .expect("valid timestamp");
        let now = DateTime::from_timestamp(now.timestamp(), 0).expect("valid timestamp");
        let mut session =
            AuthSession::signed_in(UserContext::default(), Some(jwt_expiring_at(expiry)));

        let outcome = provider.acquire_at(&mut session, now).await;

        assert!(matches!(outcome, CredentialOutcome::Ready(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_expiry_is_treated_as_valid() {
        let source = Arc::new(CountingSource::returning("unused".to_string()));
        let provider = provider(source.clone());
        let token = Some("opaque-session-token".to_string());
        let mut session = AuthSession::signed_in(UserContext::default(), token);

        let outcome = provider.acquire(&mut session).await;

        assert!(matches!(
            outcome,
            CredentialOutcome::Ready(ref credential) if credential.expires_at.is_none()
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reauth_required_signs_the_session_out() {
        let error = TokenError::ReauthRequired("invalid_grant".to_string());
        let source = Arc::new(CountingSource::failing(error));
        let provider = provider(source);
        let mut session = AuthSession::signed_in(UserContext::default(), None);

        let outcome = provider.acquire(&mut session).await;

        assert!(matches!(
            outcome,
            CredentialOutcome::Unauthenticated { ref reason } if reason == "invalid_grant"
        ));
        assert!(!session.is_signed_in());
    }

    #[tokio::test]
    async fn transient_failure_keeps_session_for_next_turn() {
        let source = Arc::new(CountingSource::failing(TokenError::Transient("503".to_string())));
        let provider = provider(source.clone());
        let mut session = AuthSession::signed_in(UserContext::default(), None);

        let first = provider.acquire(&mut session).await;
        assert!(matches!(first, CredentialOutcome::Unauthenticated { .. }));
        assert!(session.is_signed_in());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn signed_out_session_never_calls_the_source() {
        let source = Arc::new(CountingSource::returning("unused".to_string()));
        let provider = provider(source.clone());
        let mut session =
            AuthSession::signed_in(UserContext::default(), Some("opaque".to_string()));
        session.sign_out();

        let outcome = provider.acquire(&mut session).await;

        assert!(matches!(outcome, CredentialOutcome::Unauthenticated { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.status(&session), AuthStatus::SignedOut);
    }

    #[test]
    fn status_reports_expired_token_without_refresh_path() {
        let now = Utc::now();
        let provider = provider(Arc::new(CountingSource::returning("unused".to_string())));
        let token = jwt_expiring_at(now - Duration::minutes(1));
        let session = AuthSession::signed_in(UserContext::default(), Some(token));

        let status = provider.status_at(&session, now);
        assert_eq!(status.as_str(), "needs_sign_in");
        assert!(status.to_string().contains("sign in again"));
    }

    #[test]
    fn debug_output_redacts_refresh_token() {
        let user = UserContext {
            user_id: Some("user-1".to_string()),
            login_hint: None,
            refresh_token: Some(SecretString::from("rt-very-secret".to_string())),
        };

        assert!(!format!("{user:?}").contains("rt-very-secret"));
    }
}
