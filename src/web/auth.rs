use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::accounts::{self, Role, User};
use crate::config::JwtSettings;
use crate::web::{AppState, responses::ApiError};

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and validates HS256 access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            ttl: settings.ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| anyhow::anyhow!("failed to sign access token: {err}"))
    }

    /// Returns the subject of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<Uuid, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|err| ApiError::Unauthenticated(format!("Authentication failed: {err}")))?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApiError::Unauthenticated("Authentication failed: invalid subject".into()))
    }
}

/// Request-scoped caller identity resolved from the bearer token.
#[derive(Clone, Debug)]
pub struct Identity {
    pub user: User,
}

impl Identity {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header_value)?;

        let user_id = state.tokens().verify(token)?;
        let user = accounts::fetch_user_by_id(state.pool_ref(), user_id)
            .await
            .map_err(|err| {
                error!(?err, %user_id, "failed to resolve token subject");
                ApiError::Internal(err)
            })?
            .ok_or_else(|| {
                debug!(%user_id, "token subject no longer exists");
                ApiError::Unauthenticated("User not found for this token".into())
            })?;

        Ok(Identity { user })
    }
}

/// Extracts `<token>` from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: Option<&str>) -> Result<&str, ApiError> {
    let missing =
        || ApiError::Unauthenticated("Not authorized to access this route - no token provided".into());

    let value = header_value.ok_or_else(missing)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or_else(missing)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(missing());
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(missing());
    }
    Ok(token)
}

/// Fails with `Forbidden` unless the caller's role is in `allowed`.
pub fn require_role(identity: &Identity, allowed: &[Role]) -> Result<(), ApiError> {
    let role = identity.role();
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Role {role} is not authorized to access this route"
        )))
    }
}

/// Coordinators pass unconditionally; students only for resources they own.
pub fn ensure_owner_or_coordinator(
    identity: &Identity,
    owner_id: Uuid,
    message: &str,
) -> Result<(), ApiError> {
    if identity.user.is_coordinator() || identity.id() == owner_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden(message.to_string()))
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accounts::Profile;

    pub(crate) fn student(id: Uuid) -> Identity {
        Identity {
            user: User {
                id,
                name: "Asha Raman".into(),
                email: "asha@example.com".into(),
                profile: Profile::Student {
                    registration_number: "3122225001001".into(),
                    batch: "2022-26".into(),
                    mobile_number: "9876543210".into(),
                },
                created_at: Utc::now(),
            },
        }
    }

    pub(crate) fn coordinator() -> Identity {
        Identity {
            user: User {
                id: Uuid::new_v4(),
                name: "Dr. Kumar".into(),
                email: "kumar@example.com".into(),
                profile: Profile::Coordinator,
                created_at: Utc::now(),
            },
        }
    }

    fn issuer(secret: &str, ttl: Duration) -> TokenIssuer {
        TokenIssuer::new(&JwtSettings {
            secret: secret.into(),
            ttl,
        })
    }

    #[test]
    fn issued_token_round_trips_subject() {
        let tokens = issuer("test-secret-key", Duration::hours(1));
        let user_id = Uuid::new_v4();
        let token = tokens.issue(user_id).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), user_id);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issuer("secret-one", Duration::hours(1))
            .issue(Uuid::new_v4())
            .unwrap();
        let err = issuer("secret-two", Duration::hours(1))
            .verify(&token)
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        // Past the default 60s validation leeway.
        let tokens = issuer("test-secret-key", Duration::seconds(-120));
        let token = tokens.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            tokens.verify(&token),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let tokens = issuer("test-secret-key", Duration::hours(1));
        assert!(matches!(
            tokens.verify("not-a-token"),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert_eq!(bearer_token(Some("bearer   abc")).unwrap(), "abc");
        assert!(bearer_token(None).is_err());
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer")).is_err());
        assert!(bearer_token(Some("Bearer   ")).is_err());
    }

    #[test]
    fn role_gate() {
        let student = student(Uuid::new_v4());
        assert!(require_role(&student, &[Role::Student]).is_ok());
        assert!(matches!(
            require_role(&student, &[Role::Coordinator]),
            Err(ApiError::Forbidden(_))
        ));
        assert!(require_role(&coordinator(), &[Role::Coordinator]).is_ok());
    }

    #[test]
    fn ownership_gate() {
        let owner_id = Uuid::new_v4();
        let owner = student(owner_id);
        let stranger = student(Uuid::new_v4());

        assert!(ensure_owner_or_coordinator(&owner, owner_id, "denied").is_ok());
        assert!(ensure_owner_or_coordinator(&coordinator(), owner_id, "denied").is_ok());
        assert!(matches!(
            ensure_owner_or_coordinator(&stranger, owner_id, "denied"),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
        assert!(!verify_password("secret1", "not-a-hash"));
    }
}
