use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::{
    db::DbPool,
    error::AppError,
    models::{Tab, Trip, UiState},
};

pub const TRIPS_KEY: &str = "trips";
pub const CURRENT_TRIP_KEY: &str = "currentTripId";
pub const ACTIVE_TAB_KEY: &str = "activeTab";

#[derive(Clone)]
pub struct StorageService {
    db: DbPool,
}

impl StorageService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }

    pub async fn load_trips(&self) -> Result<Vec<Trip>, AppError> {
        match self.get_json::<Vec<Trip>>(TRIPS_KEY).await {
            Ok(trips) => Ok(trips.unwrap_or_default()),
            Err(AppError::Json(err)) => {
                warn!("stored trip collection is unreadable, starting empty: {err}");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn save_trips(&self, trips: &[Trip]) -> Result<(), AppError> {
        self.set_json(TRIPS_KEY, trips).await
    }

    pub async fn load_ui_state(&self) -> Result<UiState, AppError> {
        let current_trip_id = self.get(CURRENT_TRIP_KEY).await?;
        let active_tab = match self.get(ACTIVE_TAB_KEY).await? {
            Some(raw) => serde_json::from_value::<Tab>(serde_json::Value::String(raw))
                .unwrap_or_default(),
            None => Tab::default(),
        };
        Ok(UiState {
            current_trip_id,
            active_tab,
        })
    }

    pub async fn save_ui_state(&self, ui: &UiState) -> Result<(), AppError> {
        match ui.current_trip_id.as_deref() {
            Some(id) => self.set(CURRENT_TRIP_KEY, id).await?,
            None => self.remove(CURRENT_TRIP_KEY).await?,
        }
        self.set(ACTIVE_TAB_KEY, ui.active_tab.as_str()).await
    }
}
