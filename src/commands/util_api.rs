use crate::commands::call_api::CallController;
use crate::config::{validate_ice_servers, DEFAULT_ICE_SERVERS};
use crate::error::ConfigError;
use crate::peer::ice;
use crate::peer::types::ServerConfig;

impl CallController {
    /// Заменяет ICE серверы; действует со следующего звонка
    pub fn set_ice_servers(&self, servers: Vec<ServerConfig>) -> Result<(), ConfigError> {
        tracing::info!("Setting {} custom ICE servers", servers.len());
        validate_ice_servers(&servers)?;
        self.config.write().ice_servers = servers;
        Ok(())
    }

    /// Текущие ICE серверы, при пустом списке дефолтные
    pub fn ice_servers(&self) -> Vec<ServerConfig> {
        let servers = self.config.read().ice_servers.clone();
        if servers.is_empty() {
            DEFAULT_ICE_SERVERS.clone()
        } else {
            servers
        }
    }
}

/// Проверка доступности STUN/TURN сервера. При невалидном конфиге и сбоях `false`.
pub async fn check_ice_server_availability(config: &ServerConfig) -> bool {
    tracing::debug!("check_ice_server_availability called with config: {:?}", config);

    if let Err(e) = validate_ice_servers(std::slice::from_ref(config)) {
        tracing::warn!("{e}");
        return false;
    }

    match ice::check_ice_server_availability(config).await {
        Ok(available) => available,
        Err(e) => {
            tracing::warn!("ICE server check failed: {e}");
            false
        }
    }
}
