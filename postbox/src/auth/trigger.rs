//! Authorization for the queue trigger endpoint.

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};

use super::{AuthError, JwtManager};
use crate::queue::{Trigger, TriggerSource};

pub const MANUAL_TRIGGER_HEADER: &str = "x-manual-trigger";
pub const BYPASS_HEADER: &str = "x-vercel-protection-bypass";
const FETCH_SITE_HEADER: &str = "sec-fetch-site";

/// Secrets accepted by [`TriggerAuth`].
#[derive(Clone, Default)]
pub struct TriggerSecrets {
    pub cron_secret: Option<String>,
    pub bypass_secret: Option<String>,
    /// Reject unauthenticated callers. Off in development.
    pub production: bool,
}

/// Extracts the [`Trigger`] for a processor run.
///
/// Accepted, in order:
/// 1. `Authorization: Bearer <cron secret>`
/// 2. the bypass header carrying the bypass secret
/// 3. `x-manual-trigger: true` with a valid session and `Sec-Fetch-Site: same-origin`
///
/// `x-manual-trigger: true` marks a request accepted by any of these as manual. Outside
/// production anything else runs as an automatic trigger.
#[derive(Debug, Clone, Copy)]
pub struct TriggerAuth(pub Trigger);

#[async_trait]
impl<S> FromRequestParts<S> for TriggerAuth
where
    S: Send + Sync,
    JwtManager: FromRef<S>,
    TriggerSecrets: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let secrets = TriggerSecrets::from_ref(state);
        let manual = header_is(&parts.headers, MANUAL_TRIGGER_HEADER, "true");
        let with_source = |source| Trigger { manual, source };

        if let Some(expected) = secrets.cron_secret.as_deref() {
            if let Some(bearer) = parts.headers.typed_get::<Authorization<Bearer>>() {
                if secret_matches(bearer.token(), expected) {
                    return Ok(TriggerAuth(with_source(TriggerSource::Scheduler)));
                }
            }
        }

        if let Some(expected) = secrets.bypass_secret.as_deref() {
            let presented = parts
                .headers
                .get(BYPASS_HEADER)
                .and_then(|v| v.to_str().ok());
            if presented.is_some_and(|p| secret_matches(p, expected)) {
                return Ok(TriggerAuth(with_source(TriggerSource::Bypass)));
            }
        }

        if manual && header_is(&parts.headers, FETCH_SITE_HEADER, "same-origin") {
            let jwt = JwtManager::from_ref(state);
            match jwt.extract_claims(parts) {
                Ok(Some(claims)) => {
                    tracing::debug!(user_id = %claims.sub, "manual trigger");
                    return Ok(TriggerAuth(Trigger::manual(TriggerSource::Session)));
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "manual trigger with invalid session"),
            }
        }

        if !secrets.production {
            return Ok(TriggerAuth(Trigger::automatic(TriggerSource::Development)));
        }

        tracing::warn!("unauthorized trigger attempt");
        Err(AuthError::Unauthorized)
    }
}

fn header_is(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}

fn secret_matches(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && orion::util::secure_cmp(presented.as_bytes(), expected.as_bytes()).is_ok()
}
