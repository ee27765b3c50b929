use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Upper bound on waiting for an RPC response.
    pub rpc_timeout_ms: u64,
    /// Capacity of in-process connection channels.
    pub connection_buffer: usize,
    /// Upper bound on a single event delivery to one connection.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

impl GatewayConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    Memory,
    Sqlite,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub sqlite_path: String,
    pub redis_url: Option<Secret<String>>,
    pub key_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Used when RUST_LOG is unset.
    pub log_filter: String,
    pub json_logs: bool,
    pub metrics_enabled: bool,
    pub service_name: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AGENTGATE_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Parse a complete TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                enable_cors: true,
            },
            gateway: GatewayConfig {
                rpc_timeout_ms: 30_000,
                connection_buffer: 256,
                send_timeout_ms: default_send_timeout_ms(),
            },
            store: StoreConfig {
                backend: StoreBackendKind::Memory,
                sqlite_path: "agentgate-state.db".into(),
                redis_url: None,
                key_prefix: "agentgate:state".into(),
            },
            telemetry: TelemetryConfig {
                log_filter: "info,agent_gateway=debug".into(),
                json_logs: false,
                metrics_enabled: true,
                service_name: "agentgate".into(),
            },
        }
    }
}
