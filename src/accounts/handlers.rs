use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::web::{
    AppState,
    auth::{Identity, hash_password, verify_password},
    responses::{ApiError, json_ok},
};

use super::{PublicUser, RegisterRequest, User, fetch_user_row_by_email, insert_user};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    success: bool,
    token: String,
    user: PublicUser,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    success: bool,
    user: PublicUser,
}

fn token_response(state: &AppState, user: &User) -> Result<AuthResponse, ApiError> {
    let token = state.tokens().issue(user.id)?;
    Ok(AuthResponse {
        success: true,
        token,
        user: user.to_public(),
    })
}

/// Maps unique-constraint violations on registration to field errors.
fn registration_conflict(err: &sqlx::Error) -> Option<ApiError> {
    let db_err = err.as_database_error()?;
    if db_err.code().as_deref() != Some(UNIQUE_VIOLATION) {
        return None;
    }
    match db_err.constraint() {
        Some(constraint) if constraint.contains("registration_number") => Some(
            ApiError::invalid_field("registrationNumber", "Registration number already registered"),
        ),
        _ => Some(ApiError::invalid_field("email", "Email already registered")),
    }
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let Json(request) = payload?;
    let new_user = request.validate()?;

    let password_hash = hash_password(&new_user.password)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;

    let user = match insert_user(state.pool_ref(), &new_user, &password_hash).await {
        Ok(user) => user,
        Err(err) => {
            return Err(registration_conflict(&err).unwrap_or_else(|| ApiError::from(err)));
        }
    };

    info!(user_id = %user.id, role = %user.role(), "user registered");
    Ok(json_ok(StatusCode::CREATED, token_response(&state, &user)?))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(request) = payload?;

    let email = request
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let password = request.password.filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::validation("Please provide email and password"));
    };

    let invalid = || ApiError::Unauthenticated("Invalid credentials".into());

    let Some(row) = fetch_user_row_by_email(state.pool_ref(), &email).await? else {
        warn!("login attempt for unknown email");
        return Err(invalid());
    };
    if !verify_password(&password, &row.password_hash) {
        warn!(user_id = %row.id, "login attempt with wrong password");
        return Err(invalid());
    }

    let user = User::try_from(row)?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(token_response(&state, &user)?))
}

pub async fn me(identity: Identity) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        success: true,
        user: identity.user.to_public(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_conflicts() {
        assert!(registration_conflict(&sqlx::Error::RowNotFound).is_none());
    }

    #[test]
    fn login_request_tolerates_missing_fields() {
        let request: LoginRequest = serde_json::from_str(r#"{"email":"a@b.co"}"#).unwrap();
        assert_eq!(request.email.as_deref(), Some("a@b.co"));
        assert!(request.password.is_none());
    }
}
