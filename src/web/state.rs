use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::{
    accounts::{self, NewUser, Profile},
    config::{AppConfig, UploadSettings},
    documents::verify::PdfTextVerifier,
    drive::DriveClient,
    web::auth::{TokenIssuer, hash_password},
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    config: Arc<AppConfig>,
    tokens: TokenIssuer,
    drive: DriveClient,
    verifier: PdfTextVerifier,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let drive = DriveClient::from_settings(&config.drive)
            .context("failed to initialize Google Drive client")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self::from_parts(pool, config, drive))
    }

    pub fn from_parts(pool: PgPool, config: AppConfig, drive: DriveClient) -> Self {
        let tokens = TokenIssuer::new(&config.jwt);
        let verifier = PdfTextVerifier::new(&config.uploads);
        Self {
            pool,
            config: Arc::new(config),
            tokens,
            drive,
            verifier,
        }
    }

    /// Creates the configured coordinator account when no coordinator exists yet.
    pub async fn ensure_seed_coordinator(&self) -> Result<()> {
        let Some(seed) = self.config.seed_coordinator.clone() else {
            return Ok(());
        };

        let has_coordinator = accounts::coordinator_exists(&self.pool)
            .await
            .context("failed to verify coordinator presence")?;
        if has_coordinator {
            return Ok(());
        }

        let password_hash = hash_password(&seed.password)
            .map_err(|err| anyhow!("failed to hash seed coordinator password: {err}"))?;

        let user = NewUser {
            name: "Coordinator".to_string(),
            email: seed.email.trim().to_lowercase(),
            password: seed.password,
            profile: Profile::Coordinator,
        };
        accounts::insert_user(&self.pool, &user, &password_hash)
            .await
            .context("failed to insert seed coordinator")?;

        info!(email = %user.email, "seeded coordinator account; change its password promptly");
        Ok(())
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn upload_settings(&self) -> &UploadSettings {
        &self.config.uploads
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn drive(&self) -> &DriveClient {
        &self.drive
    }

    pub fn verifier(&self) -> &PdfTextVerifier {
        &self.verifier
    }
}
