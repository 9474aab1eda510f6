use std::{env, net::SocketAddr, path::PathBuf};

use url::Url;
use uuid::Uuid;

use crate::error::AppError;

const DEFAULT_AI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub static_root: PathBuf,
    pub ai: AiConfig,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Url,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".into(),
            base_url: Url::parse(DEFAULT_AI_BASE_URL).expect("default AI base url is valid"),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://wayfarer.db?mode=rwc".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let static_root = env::var("STATIC_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static"));

        let api_key = env::var("AI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        let model = env::var("AI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());
        let base_url = Url::parse(
            &env::var("AI_BASE_URL").unwrap_or_else(|_| DEFAULT_AI_BASE_URL.to_string()),
        )
        .map_err(|err| AppError::Config(format!("invalid AI_BASE_URL: {err}")))?;

        let client_id = env::var("CLIENT_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            database_url,
            listen_addr,
            static_root,
            ai: AiConfig {
                api_key,
                model,
                base_url,
            },
            client_id,
        })
    }
}
