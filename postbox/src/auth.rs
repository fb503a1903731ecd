//! Password accounts and JWT sessions.
//!
//! Sessions are HS-384 signed JWTs carried in the `jwt` cookie or an
//! `Authorization: Bearer` header. [`AuthUser`] extracts and validates them.

mod trigger;

pub use trigger::{TriggerAuth, TriggerSecrets, BYPASS_HEADER, MANUAL_TRIGGER_HEADER};

use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash};
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{self, SameSite};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, Cookie, HeaderMapExt};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha384;
use time::OffsetDateTime;
use uuid::Uuid;

const DEFAULT_SESSION_LENGTH: time::Duration = time::Duration::weeks(2);
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("session secret too short (len={0}), use at least 32 characters")]
    WeakSecret(usize),
    #[error("token signing failed: {0}")]
    Signing(#[from] jwt::Error),
    #[error("Password hashing error {0}")]
    PasswordHash(argon2::password_hash::errors::Error),
    #[error("Password hashing panic")]
    PasswordHashPanic,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "code": status.as_u16(),
            "message": status.canonical_reason().unwrap_or("error"),
        }));
        (status, body).into_response()
    }
}

pub struct CookieConfig {
    name: &'static str,
    http_only: bool,
    secure: bool,
    same_site: SameSite,
}

impl CookieConfig {
    /// Uses strict, secure, http_only settings by default
    pub fn new(name: &'static str) -> CookieConfig {
        CookieConfig {
            name,
            http_only: true,
            secure: true,
            same_site: SameSite::Strict,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        CookieConfig::new("jwt")
    }
}

/// Session claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    /// Standard JWT `exp` claim.
    pub exp: i64,
}

impl Claims {
    pub fn is_expired(&self) -> bool {
        self.exp < OffsetDateTime::now_utc().unix_timestamp()
    }
}

#[derive(Clone)]
pub struct JwtManager(Arc<JwtConfig>);

pub struct JwtConfig {
    key: Hmac<Sha384>,
    duration: time::Duration,
    cookie_config: CookieConfig,
}

impl JwtConfig {
    pub fn new(secret: &str) -> Result<JwtConfig, AuthError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret(secret.len()));
        }
        // HMAC accepts keys of any length
        let key = Hmac::<Sha384>::new_from_slice(secret.as_bytes())
            .map_err(|_| AuthError::WeakSecret(secret.len()))?;
        Ok(JwtConfig {
            key,
            duration: DEFAULT_SESSION_LENGTH,
            cookie_config: CookieConfig::default(),
        })
    }

    pub fn duration(mut self, duration: time::Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn cookie_config(mut self, cookie_config: CookieConfig) -> Self {
        self.cookie_config = cookie_config;
        self
    }

    pub fn build(self) -> JwtManager {
        JwtManager(Arc::new(self))
    }
}

impl JwtManager {
    pub fn generate_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id,
            exp: (OffsetDateTime::now_utc() + self.0.duration).unix_timestamp(),
        };
        Ok(claims.sign_with_key(&self.0.key)?)
    }

    pub fn session_cookie(&self, token: &str) -> cookie::Cookie<'static> {
        let config = &self.0.cookie_config;
        cookie::Cookie::build((config.name, token.to_owned()))
            .path("/")
            .http_only(config.http_only)
            .secure(config.secure)
            .same_site(config.same_site)
            .build()
    }

    /// JSON `{token}` plus the session cookie.
    pub fn login_response(&self, user_id: Uuid) -> Result<Response, AuthError> {
        let token = self.generate_token(user_id)?;
        let jar = cookie::CookieJar::new().add(self.session_cookie(&token));
        Ok((jar, Json(json!({ "token": token }))).into_response())
    }

    /// Expires the session cookie.
    pub fn logout_response(&self) -> Response {
        let mut removal = self.session_cookie("");
        removal.make_removal();
        let jar = cookie::CookieJar::new().add(removal);
        (jar, Json(json!({ "ok": true }))).into_response()
    }

    /// Parse and verify a token, rejecting expired ones.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims: Claims = token.verify_with_key(&self.0.key).map_err(|e| {
            tracing::debug!("JWT failed to verify: {}", e);
            AuthError::Unauthorized
        })?;
        if claims.is_expired() {
            tracing::debug!("token expired");
            return Err(AuthError::Unauthorized);
        }
        Ok(claims)
    }

    /// Returns Ok(None) if the request did not contain auth info
    pub fn extract_claims(&self, parts: &Parts) -> Result<Option<Claims>, AuthError> {
        if let Some(auth_header) = parts.headers.typed_get::<Authorization<Bearer>>() {
            return self.verify_token(auth_header.token()).map(Some);
        }

        if let Some(cookie) = parts.headers.typed_get::<Cookie>() {
            if let Some(token) = cookie.get(self.0.cookie_config.name) {
                return self.verify_token(token).map(Some);
            }
        }

        Ok(None)
    }
}

/// Extractor for routes that must be signed in.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtManager: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jwt = JwtManager::from_ref(state);
        let claims = jwt.extract_claims(parts)?.ok_or(AuthError::Unauthorized)?;
        Ok(AuthUser { id: claims.sub })
    }
}

/// Hashes a password. Produced hash is a "PHC String" that includes a random salt
///
/// The underlying Argon2 hashing is computationally intensive,
/// therefore performed on a thread where blocking is acceptable
pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || -> Result<String, AuthError> {
        let salt = SaltString::generate(rand::thread_rng());
        Ok(
            PasswordHash::generate(Argon2::default(), password, salt.as_salt())
                .inspect_err(|e| tracing::warn!("failed to generate password hash: {}", e))
                .map_err(AuthError::PasswordHash)?
                .to_string(),
        )
    })
    .await
    .map_err(|_| AuthError::PasswordHashPanic)?
}

/// Verifies a password against a PHC hash string.
pub async fn verify_password(password: String, password_hash: String) -> Result<(), AuthError> {
    tokio::task::spawn_blocking(move || -> Result<(), AuthError> {
        let hash = PasswordHash::new(&password_hash)
            .inspect_err(|err| tracing::warn!("invalid password hash: {}", err))
            .map_err(AuthError::PasswordHash)?;

        match hash.verify_password(&[&Argon2::default()], password) {
            Ok(_) => Ok(()),
            Err(argon2::password_hash::Error::Password) => Err(AuthError::Unauthorized),
            Err(err) => {
                tracing::trace!("failed to verify password hash: {}", err);
                Err(AuthError::PasswordHash(err))
            }
        }
    })
    .await
    .map_err(|_| AuthError::PasswordHashPanic)?
}
