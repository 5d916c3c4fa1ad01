//! Server configuration (spec §6), read from the process environment.

use conveyor_core::ConveyorError;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub database_url: String,
    pub shared_key: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConveyorError> {
        let bind_address =
            std::env::var("CONVEYOR_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let database_url = std::env::var("CONVEYOR_DATABASE_URL")
            .map_err(|_| ConveyorError::ConfigInvalid("CONVEYOR_DATABASE_URL is not set".into()))?;
        let shared_key = std::env::var("CONVEYOR_SHARED_KEY")
            .map_err(|_| ConveyorError::ConfigInvalid("CONVEYOR_SHARED_KEY is not set".into()))?;
        Ok(Self {
            bind_address,
            database_url,
            shared_key,
        })
    }
}
