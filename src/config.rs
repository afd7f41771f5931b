//! Server configuration.

use crate::framework::Environment;

/// Prefix of process variables forwarded to the actor as environment bindings.
pub const ACTOR_ENV_PREFIX: &str = "ACTOR_";

#[derive(Debug, Clone, PartialEq)]
pub struct RpcConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// POST endpoint for HTTP calls
    pub rpc_path: String,
    /// GET endpoint for the schema descriptor
    pub schema_path: String,
    /// WebSocket upgrade endpoint
    pub ws_path: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8787,
            rpc_path: "/rpc".to_string(),
            schema_path: "/__schema".to_string(),
            ws_path: "/ws".to_string(),
        }
    }
}

impl RpcConfig {
    /// Load server config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `RPC_BIND_ADDRESS` (e.g. "127.0.0.1")
    /// - `RPC_PORT` (e.g. "8080")
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bind_address) = lookup("RPC_BIND_ADDRESS") {
            if !bind_address.trim().is_empty() {
                config.bind_address = bind_address;
            }
        }

        if let Some(Ok(port)) = lookup("RPC_PORT").map(|p| p.parse::<u16>()) {
            config.port = port;
        }

        config
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Actor bindings from `ACTOR_`-prefixed process variables, prefix stripped.
pub fn actor_env_from_process() -> Environment {
    actor_env_from(std::env::vars())
}

fn actor_env_from(vars: impl IntoIterator<Item = (String, String)>) -> Environment {
    Environment::from_pairs(vars.into_iter().filter_map(|(key, value)| {
        key.strip_prefix(ACTOR_ENV_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| (name.to_string(), value))
    }))
}
