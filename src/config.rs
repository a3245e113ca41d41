// Service configuration: defaults, then config.toml, then APP_* environment variables

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_address: String,
    pub firebase_project_id: Option<String>,
    // Cars per listing page
    pub page_size: u32,
    pub cars_collection: String,
    pub users_collection: String,
    pub chats_collection: String,
    // Listing sessions untouched for this long are dropped
    pub session_ttl_secs: u64,
}

impl Settings {
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let builder = Self::with_defaults(Config::builder())?
            // Load from a configuration file (e.g., config.toml)
            .add_source(File::with_name("config").required(false))
            // Load from environment variables (e.g., APP_FIREBASE_PROJECT_ID)
            .add_source(Environment::with_prefix("APP").try_parsing(true));

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(builder
            .set_default("server_address", "127.0.0.1:3000")?
            .set_default("page_size", 10)?
            .set_default("cars_collection", "cars")?
            .set_default("users_collection", "users")?
            .set_default("chats_collection", "chats")?
            .set_default("session_ttl_secs", 1800)?)
    }

    // Settings without any file or environment source
    pub fn defaults() -> Result<Self> {
        Ok(Self::with_defaults(Config::builder())?.build()?.try_deserialize()?)
    }

    pub fn project_id(&self) -> Result<&str> {
        self.firebase_project_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Firebase project ID not configured"))
    }
}
