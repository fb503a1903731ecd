use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::error::{Error, Result};
use crate::models::User;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(data): Json<Credentials>,
) -> Result<Response> {
    let email = data.email.trim().to_lowercase();
    if email.parse::<lettre::Address>().is_err() {
        return Err(Error::Invalid("a valid email is required".into()));
    }
    if data.password.len() < MIN_PASSWORD_LEN {
        return Err(Error::Invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let user = User {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(data.password).await?,
        created_at: OffsetDateTime::now_utc(),
    };
    state.users.create_user(&user).await?;
    tracing::info!(user_id = %user.id, "user registered");

    let response = state.jwt.login_response(user.id)?;
    Ok((StatusCode::CREATED, response).into_response())
}

pub async fn login(
    State(state): State<AppState>,
    Json(data): Json<Credentials>,
) -> Result<Response> {
    let email = data.email.trim().to_lowercase();
    let user = state
        .users
        .find_user_by_email(&email)
        .await?
        .ok_or(Error::Unauthorized)?;
    verify_password(data.password, user.password_hash).await?;

    Ok(state.jwt.login_response(user.id)?)
}

pub async fn logout(State(state): State<AppState>) -> Response {
    state.jwt.logout_response()
}
