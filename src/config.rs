/// Configuration management for the account resolver
use crate::error::{ResolverError, ResolverResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub trust: TrustConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
}

/// JWT store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    Directory {
        location: PathBuf,
        create: bool,
        read_only: bool,
        debounce_ms: u64,
    },
    Memory {
        read_only: bool,
    },
    /// Read-only view of an nsc operator directory
    Nsc {
        location: PathBuf,
        debounce_ms: u64,
    },
}

/// Trust anchor sources; at least one must be set unless an nsc store
/// supplies the operator token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Path to a self-signed operator JWT
    pub operator_jwt: Option<PathBuf>,
    /// Additional operator public keys
    pub trusted_keys: Vec<String>,
}

/// Notification bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusConfig {
    Local,
    Redis { url: String },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .unwrap_or_else(|_| "false".to_string())
        .parse()
        .unwrap_or(false)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ResolverResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("RESOLVER_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RESOLVER_PORT")
            .unwrap_or_else(|_| "9090".to_string())
            .parse()
            .map_err(|_| ResolverError::Config("Invalid port number".to_string()))?;

        let read_only = env_flag("RESOLVER_STORE_READ_ONLY");
        let debounce_ms = env::var("RESOLVER_STORE_DEBOUNCE_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        let store = match env::var("RESOLVER_STORE_KIND")
            .unwrap_or_else(|_| "dir".to_string())
            .as_str()
        {
            "dir" | "directory" => StoreConfig::Directory {
                location: env::var("RESOLVER_STORE_DIR")
                    .unwrap_or_else(|_| "./data/jwts".to_string())
                    .into(),
                create: env_flag("RESOLVER_STORE_CREATE"),
                read_only,
                debounce_ms,
            },
            "mem" | "memory" => StoreConfig::Memory { read_only },
            "nsc" => StoreConfig::Nsc {
                location: env::var("RESOLVER_STORE_DIR")
                    .map_err(|_| {
                        ResolverError::Config(
                            "RESOLVER_STORE_DIR must name the nsc operator directory".to_string(),
                        )
                    })?
                    .into(),
                debounce_ms,
            },
            other => {
                return Err(ResolverError::Config(format!(
                    "Unknown store kind {:?}",
                    other
                )))
            }
        };

        // Parse trusted keys from comma-separated list
        let trusted_keys = env::var("RESOLVER_TRUSTED_KEYS")
            .unwrap_or_else(|_| String::new())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();
        let operator_jwt = env::var("RESOLVER_OPERATOR_JWT").ok().map(PathBuf::from);

        let bus = match env::var("RESOLVER_BUS")
            .unwrap_or_else(|_| "local".to_string())
            .as_str()
        {
            "local" => BusConfig::Local,
            "redis" => BusConfig::Redis {
                url: env::var("RESOLVER_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            other => {
                return Err(ResolverError::Config(format!(
                    "Unknown notification bus {:?}",
                    other
                )))
            }
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig { hostname, port },
            store,
            trust: TrustConfig {
                operator_jwt,
                trusted_keys,
            },
            bus,
            logging: LoggingConfig {
                level: log_level,
                json: env_flag("RESOLVER_LOG_JSON"),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ResolverResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ResolverError::Config("Hostname cannot be empty".to_string()));
        }

        let nsc_operator = matches!(self.store, StoreConfig::Nsc { .. });
        if self.trust.operator_jwt.is_none() && self.trust.trusted_keys.is_empty() && !nsc_operator
        {
            return Err(ResolverError::Config(
                "Either RESOLVER_OPERATOR_JWT or RESOLVER_TRUSTED_KEYS is required".to_string(),
            ));
        }

        if let StoreConfig::Directory { debounce_ms: 0, .. } | StoreConfig::Nsc { debounce_ms: 0, .. } =
            self.store
        {
            return Err(ResolverError::Config(
                "Store debounce must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Address the HTTP listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }
}
