use std::{borrow::Cow, sync::Arc};

use chrono::Duration;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use crate::{
    config::Config, error::Error, jwt::SessionKey, media::MediaStore,
    shopping_list::document::{self, BUNDLED_FONT},
};

/// Everything a request handler needs, shared across requests.
pub struct AppState {
    pub pool: Pool<Postgres>,
    pub session_key: SessionKey,
    pub media: MediaStore,
    /// TrueType font the shopping list PDF is set in.
    pub list_font: Cow<'static, [u8]>,
}

impl AppState {
    pub fn new(pool: Pool<Postgres>, session_key: SessionKey, media: MediaStore) -> Arc<Self> {
        Arc::new(Self {
            pool,
            session_key,
            media,
            list_font: Cow::Borrowed(BUNDLED_FONT),
        })
    }

    /// Connects to the database and applies pending migrations.
    pub async fn from_config(config: &Config) -> Result<Arc<Self>, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| Error::Internal(format!("Could not connect to database: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Internal(format!("Could not run migrations: {e}")))?;
        log::info!("Database ready");

        let session_key = SessionKey::new(
            config.jwt_secret.as_bytes(),
            Duration::hours(config.session_hours),
        )?;

        let list_font = match &config.shopping_list_font {
            Some(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    Error::Internal(format!("Could not read {}: {e}", path.display()))
                })?;
                document::check_font(&data)?;
                log::info!("Shopping lists use font {}", path.display());
                Cow::Owned(data)
            }
            None => Cow::Borrowed(BUNDLED_FONT),
        };

        Ok(Arc::new(Self {
            pool,
            session_key,
            media: MediaStore::new(config.media_root.clone()),
            list_font,
        }))
    }
}
