// Конфигурация приложения
// В release сборке по умолчанию пишем только предупреждения, переопределяется через P2PCALL_LOG

use crate::error::ConfigError;
use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "p2pcall_lib=debug,p2pcall=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "p2pcall_lib=warn,p2pcall=warn,webrtc=error";

pub const DEFAULT_ROOMS_COLLECTION: &str = "rooms";

pub const DEFAULT_CANDIDATE_POOL_SIZE: u8 = 10;

/// Дефолтные STUN серверы
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    /// Relay/STUN серверы для peer connection
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    /// Коллекция, в которой лежат комнаты
    pub rooms_collection: String,
    pub log_filter: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            ice_candidate_pool_size: DEFAULT_CANDIDATE_POOL_SIZE,
            rooms_collection: DEFAULT_ROOMS_COLLECTION.into(),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl CallConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Читает конфигурацию из окружения.
    ///
    /// `P2PCALL_ICE_SERVERS`: список URL через запятую; если не задан, берутся
    /// `P2PCALL_ICE_SERVER_1` и `P2PCALL_ICE_SERVER_2`, пустые пропускаются.
    /// TURN учётка общая: `P2PCALL_TURN_USERNAME`/`P2PCALL_TURN_CREDENTIAL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let urls: Vec<String> = match lookup("P2PCALL_ICE_SERVERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => ["P2PCALL_ICE_SERVER_1", "P2PCALL_ICE_SERVER_2"]
                .iter()
                .filter_map(|name| lookup(name))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        if !urls.is_empty() {
            let username = lookup("P2PCALL_TURN_USERNAME");
            let credential = lookup("P2PCALL_TURN_CREDENTIAL");
            cfg.ice_servers = urls
                .into_iter()
                .enumerate()
                .map(|(i, url)| {
                    let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
                    ServerConfig {
                        id: format!("env-{}", i + 1),
                        r#type: if is_turn { "turn" } else { "stun" }.into(),
                        url,
                        username: if is_turn { username.clone() } else { None },
                        credential: if is_turn { credential.clone() } else { None },
                    }
                })
                .collect();
        }

        if let Some(pool) = lookup("P2PCALL_ICE_POOL_SIZE") {
            cfg.ice_candidate_pool_size = pool.trim().parse().map_err(|e| ConfigError::Env {
                name: "P2PCALL_ICE_POOL_SIZE",
                reason: format!("{e}"),
            })?;
        }

        if let Some(collection) = lookup("P2PCALL_ROOMS_COLLECTION") {
            let collection = collection.trim();
            if collection.is_empty() || collection.contains('/') {
                return Err(ConfigError::Env {
                    name: "P2PCALL_ROOMS_COLLECTION",
                    reason: "must be a single non-empty path segment".into(),
                });
            }
            cfg.rooms_collection = collection.into();
        }

        if let Some(filter) = lookup("P2PCALL_LOG") {
            cfg.log_filter = filter;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ice_servers(&self.ice_servers)
    }
}

/// Валидация ICE серверов: непустой URL, TURN требует логин и пароль
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(ConfigError::InvalidIceServer {
                id: server.id.clone(),
                reason: "server URL cannot be empty",
            });
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(ConfigError::InvalidIceServer {
                id: server.id.clone(),
                reason: "TURN servers require username and credential",
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = CallConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(cfg, CallConfig::default());
        assert_eq!(cfg.rooms_collection, "rooms");
        assert_eq!(cfg.ice_servers.len(), 2);
    }

    #[test]
    fn numbered_servers_skip_blank_entries() {
        let cfg = CallConfig::from_lookup(env(&[
            ("P2PCALL_ICE_SERVER_1", "stun:stun.example.org:3478"),
            ("P2PCALL_ICE_SERVER_2", ""),
        ]))
        .unwrap();
        assert_eq!(cfg.ice_servers.len(), 1);
        assert_eq!(cfg.ice_servers[0].url, "stun:stun.example.org:3478");
    }

    #[test]
    fn turn_from_env_needs_credentials() {
        let err = CallConfig::from_lookup(env(&[(
            "P2PCALL_ICE_SERVERS",
            "stun:a.example.org, turn:b.example.org:3478",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIceServer { .. }));

        let cfg = CallConfig::from_lookup(env(&[
            ("P2PCALL_ICE_SERVERS", "stun:a.example.org, turn:b.example.org:3478"),
            ("P2PCALL_TURN_USERNAME", "user"),
            ("P2PCALL_TURN_CREDENTIAL", "secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.ice_servers[1].r#type, "turn");
        assert_eq!(cfg.ice_servers[1].username.as_deref(), Some("user"));
        assert_eq!(cfg.ice_servers[0].username, None);
    }

    #[test]
    fn bad_pool_size_and_collection() {
        assert!(CallConfig::from_lookup(env(&[("P2PCALL_ICE_POOL_SIZE", "many")])).is_err());
        assert!(CallConfig::from_lookup(env(&[("P2PCALL_ROOMS_COLLECTION", "a/b")])).is_err());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let cfg = CallConfig::from_json(r#"{ "rooms_collection": "calls" }"#).unwrap();
        assert_eq!(cfg.rooms_collection, "calls");
        assert_eq!(cfg.ice_candidate_pool_size, DEFAULT_CANDIDATE_POOL_SIZE);
        assert!(CallConfig::from_json(r#"{ "ice_servers": [{ "id": "x", "type": "stun", "url": "" }] }"#).is_err());
    }
}
