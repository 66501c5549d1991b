//! Credential store: users, their role-specific profile, and registration rules.

use std::fmt;

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::utils::validation::{
    is_valid_batch, is_valid_email, is_valid_mobile_number, is_valid_registration_number,
};
use crate::web::{
    AppState,
    responses::{ApiError, FieldErrors},
};

pub mod handlers;

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::me))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Coordinator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Coordinator => "coordinator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Role::Student),
            "coordinator" => Some(Role::Coordinator),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific part of a user. Only students carry academic identity fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Profile {
    Student {
        registration_number: String,
        batch: String,
        mobile_number: String,
    },
    Coordinator,
}

impl Profile {
    pub fn role(&self) -> Role {
        match self {
            Profile::Student { .. } => Role::Student,
            Profile::Coordinator => Role::Coordinator,
        }
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self.profile, Profile::Coordinator)
    }

    pub fn to_public(&self) -> PublicUser {
        let (registration_number, batch, mobile_number) = match &self.profile {
            Profile::Student {
                registration_number,
                batch,
                mobile_number,
            } => (
                Some(registration_number.clone()),
                Some(batch.clone()),
                Some(mobile_number.clone()),
            ),
            Profile::Coordinator => (None, None, None),
        };

        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role(),
            registration_number,
            batch,
            mobile_number,
            created_at: self.created_at,
        }
    }
}

/// User shape returned to clients; never includes the password hash.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub registration_number: Option<String>,
    pub batch: Option<String>,
    pub mobile_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let profile = match Role::parse(&row.role) {
            Some(Role::Coordinator) => Profile::Coordinator,
            Some(Role::Student) => Profile::Student {
                registration_number: row
                    .registration_number
                    .ok_or_else(|| anyhow!("student {} has no registration number", row.id))?,
                batch: row
                    .batch
                    .ok_or_else(|| anyhow!("student {} has no batch", row.id))?,
                mobile_number: row
                    .mobile_number
                    .ok_or_else(|| anyhow!("student {} has no mobile number", row.id))?,
            },
            None => return Err(anyhow!("user {} has unknown role `{}`", row.id, row.role)),
        };

        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            profile,
            created_at: row.created_at,
        })
    }
}

/// Raw registration payload as submitted by the client.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
}

/// A registration that passed validation and is ready to be hashed and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub profile: Profile,
}

impl RegisterRequest {
    /// Validates the payload; student fields are checked only for the student role.
    pub fn validate(self) -> Result<NewUser, ApiError> {
        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") => Role::Student,
            Some(value) => {
                Role::parse(value).ok_or_else(|| ApiError::invalid_field("role", "Invalid role"))?
            }
        };

        let mut errors = FieldErrors::new();

        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            errors.insert("name".into(), "Please provide name".into());
        }

        let email = self
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_default();
        if email.is_empty() {
            errors.insert("email".into(), "Please provide email".into());
        } else if !is_valid_email(&email) {
            errors.insert("email".into(), "Please provide a valid email".into());
        }

        let password = self.password.unwrap_or_default();
        if password.is_empty() {
            errors.insert("password".into(), "Please provide password".into());
        } else if password.chars().count() < MIN_PASSWORD_LEN {
            errors.insert(
                "password".into(),
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }

        let profile = match role {
            Role::Coordinator => Profile::Coordinator,
            Role::Student => {
                let registration_number = required_trimmed(self.registration_number);
                let batch = required_trimmed(self.batch);
                let mobile_number = required_trimmed(self.mobile_number);

                match &registration_number {
                    None => {
                        errors.insert(
                            "registrationNumber".into(),
                            "Registration number is required".into(),
                        );
                    }
                    Some(value) if !is_valid_registration_number(value) => {
                        errors.insert(
                            "registrationNumber".into(),
                            format!("{value} is not a valid registration number! Must be 13 digits."),
                        );
                    }
                    _ => {}
                }
                match &batch {
                    None => {
                        errors.insert("batch".into(), "Batch is required".into());
                    }
                    Some(value) if !is_valid_batch(value) => {
                        errors.insert(
                            "batch".into(),
                            "Batch should be in format: YYYY-YY".into(),
                        );
                    }
                    _ => {}
                }
                match &mobile_number {
                    None => {
                        errors.insert("mobileNumber".into(), "Mobile number is required".into());
                    }
                    Some(value) if !is_valid_mobile_number(value) => {
                        errors.insert(
                            "mobileNumber".into(),
                            "Mobile number should be 10 digits".into(),
                        );
                    }
                    _ => {}
                }

                Profile::Student {
                    registration_number: registration_number.unwrap_or_default(),
                    batch: batch.unwrap_or_default(),
                    mobile_number: mobile_number.unwrap_or_default(),
                }
            }
        };

        ApiError::from_fields(errors)?;

        Ok(NewUser {
            name: name.to_string(),
            email,
            password,
            profile,
        })
    }
}

fn required_trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, registration_number, batch, mobile_number, created_at";

pub async fn fetch_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to load user by id")?;

    row.map(User::try_from).transpose()
}

pub async fn fetch_user_row_by_email(pool: &PgPool, email: &str) -> sqlx::Result<Option<UserRow>> {
    sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await
}

/// Inserts a validated user. Unique violations are surfaced as `sqlx::Error::Database`.
pub async fn insert_user(pool: &PgPool, user: &NewUser, password_hash: &str) -> sqlx::Result<User> {
    let (registration_number, batch, mobile_number) = match &user.profile {
        Profile::Student {
            registration_number,
            batch,
            mobile_number,
        } => (
            Some(registration_number.as_str()),
            Some(batch.as_str()),
            Some(mobile_number.as_str()),
        ),
        Profile::Coordinator => (None, None, None),
    };

    let id = Uuid::new_v4();
    let created_at: DateTime<Utc> = sqlx::query_scalar(
        "INSERT INTO users (id, name, email, password_hash, role, registration_number, batch, mobile_number)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING created_at",
    )
    .bind(id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(password_hash)
    .bind(user.profile.role().as_str())
    .bind(registration_number)
    .bind(batch)
    .bind(mobile_number)
    .fetch_one(pool)
    .await?;

    Ok(User {
        id,
        name: user.name.clone(),
        email: user.email.clone(),
        profile: user.profile.clone(),
        created_at,
    })
}

pub async fn coordinator_exists(pool: &PgPool) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = 'coordinator')")
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student_request() -> RegisterRequest {
        RegisterRequest {
            name: Some("Asha Raman".into()),
            email: Some("Asha@Example.com".into()),
            password: Some("secret1".into()),
            role: Some("student".into()),
            registration_number: Some("3122225001001".into()),
            batch: Some("2022-26".into()),
            mobile_number: Some("9876543210".into()),
        }
    }

    #[test]
    fn student_registration_builds_student_profile() {
        let user = student_request().validate().expect("valid student");
        assert_eq!(user.email, "asha@example.com");
        assert_eq!(
            user.profile,
            Profile::Student {
                registration_number: "3122225001001".into(),
                batch: "2022-26".into(),
                mobile_number: "9876543210".into(),
            }
        );
    }

    #[test]
    fn missing_role_defaults_to_student() {
        let mut request = student_request();
        request.role = None;
        let user = request.validate().expect("valid student");
        assert_eq!(user.profile.role(), Role::Student);
    }

    #[test]
    fn student_missing_academic_fields_is_rejected() {
        for strip in 0..3 {
            let mut request = student_request();
            match strip {
                0 => request.registration_number = None,
                1 => request.batch = None,
                _ => request.mobile_number = None,
            }
            let err = request.validate().expect_err("must be rejected");
            assert!(matches!(err, ApiError::Validation { .. }));
        }
    }

    #[test]
    fn student_with_malformed_fields_reports_each_field() {
        let mut request = student_request();
        request.registration_number = Some("12345".into());
        request.batch = Some("2022".into());
        request.mobile_number = Some("12".into());

        match request.validate() {
            Err(ApiError::Validation { fields, .. }) => {
                assert!(fields.contains_key("registrationNumber"));
                assert!(fields.contains_key("batch"));
                assert!(fields.contains_key("mobileNumber"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn coordinator_registration_without_student_fields_succeeds() {
        let request = RegisterRequest {
            name: Some("Dr. Kumar".into()),
            email: Some("kumar@example.com".into()),
            password: Some("coordinator".into()),
            role: Some("coordinator".into()),
            ..Default::default()
        };
        let user = request.validate().expect("coordinator is valid");
        assert_eq!(user.profile, Profile::Coordinator);
    }

    #[test]
    fn coordinator_ignores_malformed_student_fields() {
        let request = RegisterRequest {
            name: Some("Dr. Kumar".into()),
            email: Some("kumar@example.com".into()),
            password: Some("coordinator".into()),
            role: Some("coordinator".into()),
            registration_number: Some("bogus".into()),
            batch: Some("nope".into()),
            mobile_number: Some("1".into()),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let mut request = student_request();
        request.role = Some("admin".into());
        assert!(matches!(request.validate(), Err(ApiError::Validation { .. })));
    }

    #[test]
    fn short_password_is_rejected() {
        let mut request = student_request();
        request.password = Some("abc".into());
        match request.validate() {
            Err(ApiError::Validation { fields, .. }) => assert!(fields.contains_key("password")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn row_conversion_requires_student_fields() {
        let row = UserRow {
            id: Uuid::new_v4(),
            name: "Asha".into(),
            email: "asha@example.com".into(),
            password_hash: "hash".into(),
            role: "student".into(),
            registration_number: None,
            batch: Some("2022-26".into()),
            mobile_number: Some("9876543210".into()),
            created_at: Utc::now(),
        };
        assert!(User::try_from(row).is_err());
    }

    #[test]
    fn public_user_omits_student_fields_for_coordinators() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Dr. Kumar".into(),
            email: "kumar@example.com".into(),
            profile: Profile::Coordinator,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(user.to_public()).unwrap();
        assert_eq!(value["role"], "coordinator");
        assert!(value.get("registrationNumber").is_none());
        assert!(value["createdAt"].is_string());
    }
}
