use std::env;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_JWT_EXPIRE: &str = "30d";

/// Process-wide settings resolved once at startup from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt: JwtSettings,
    pub drive: DriveSettings,
    pub uploads: UploadSettings,
    pub cors_allowed_origin: Option<String>,
    pub seed_coordinator: Option<SeedCoordinator>,
}

#[derive(Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DriveSettings {
    pub root_folder_id: String,
    pub credentials_json: String,
}

impl std::fmt::Debug for DriveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveSettings")
            .field("root_folder_id", &self.root_folder_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub max_bytes: usize,
    pub pdftoppm_bin: String,
    pub tesseract_bin: String,
}

#[derive(Clone)]
pub struct SeedCoordinator {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SeedCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedCoordinator")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;
        let secret = env::var("JWT_SECRET").context("JWT_SECRET env var is missing")?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let expire = env::var("JWT_EXPIRE").unwrap_or_else(|_| DEFAULT_JWT_EXPIRE.to_string());
        let ttl = parse_ttl(&expire).with_context(|| format!("invalid JWT_EXPIRE value `{expire}`"))?;

        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let root_folder_id =
            env::var("DRIVE_ROOT_FOLDER_ID").context("DRIVE_ROOT_FOLDER_ID env var is missing")?;
        let credentials_json =
            env::var("GOOGLE_CREDENTIALS").context("GOOGLE_CREDENTIALS env var is missing")?;

        let max_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid MAX_UPLOAD_BYTES value `{raw}`"))?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let seed_coordinator = match (
            env::var("SEED_COORDINATOR_EMAIL"),
            env::var("SEED_COORDINATOR_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some(SeedCoordinator { email, password }),
            _ => None,
        };

        Ok(Self {
            database_url,
            port,
            jwt: JwtSettings { secret, ttl },
            drive: DriveSettings {
                root_folder_id,
                credentials_json,
            },
            uploads: UploadSettings {
                max_bytes,
                pdftoppm_bin: env::var("PDFTOPPM_BIN").unwrap_or_else(|_| "pdftoppm".to_string()),
                tesseract_bin: env::var("TESSERACT_BIN")
                    .unwrap_or_else(|_| "tesseract".to_string()),
            },
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .ok()
                .filter(|origin| !origin.trim().is_empty()),
            seed_coordinator,
        })
    }
}

/// Parses lifetimes such as `30d`, `12h`, `45m`, `90s` or a bare number of seconds.
pub fn parse_ttl(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c.to_ascii_lowercase()),
        Some(_) => (raw, 's'),
        None => return Err(anyhow!("lifetime must not be empty")),
    };

    let amount: i64 = digits
        .trim()
        .parse()
        .map_err(|_| anyhow!("lifetime must start with a whole number"))?;
    if amount <= 0 {
        bail!("lifetime must be positive");
    }

    let ttl = match unit {
        'd' => Duration::try_days(amount),
        'h' => Duration::try_hours(amount),
        'm' => Duration::try_minutes(amount),
        's' => Duration::try_seconds(amount),
        other => bail!("unsupported lifetime unit `{other}`"),
    };

    ttl.ok_or_else(|| anyhow!("lifetime `{raw}` is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_lifetimes() {
        assert_eq!(parse_ttl("30d").unwrap(), Duration::days(30));
        assert_eq!(parse_ttl("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_ttl("45M").unwrap(), Duration::minutes(45));
        assert_eq!(parse_ttl("3600").unwrap(), Duration::seconds(3600));
    }

    #[test]
    fn rejects_bad_lifetimes() {
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("0d").is_err());
        assert!(parse_ttl("ten days").is_err());
        assert!(parse_ttl("5w").is_err());
    }

    #[test]
    fn out_of_range_lifetime_is_an_error() {
        assert!(parse_ttl("99999999999999d").is_err());
        assert!(parse_ttl("9223372036854775807s").is_err());
    }
}
