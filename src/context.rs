/// Application context and dependency injection
use crate::{
    bus::{LocalBus, NotificationBus, RedisBus},
    config::{BusConfig, ServerConfig, StoreConfig},
    error::{ResolverError, ResolverResult},
    resolver::ResolverService,
    store::{
        nsc, ChangeCallback, DirectoryStore, DirectoryStoreOptions, ErrorCallback, JwtStore,
        MemoryStore, NscStore, StoreError,
    },
    trust::{TrustAnchors, TrustEngine},
};
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub resolver: Arc<ResolverService>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ResolverResult<Self> {
        // Validate configuration
        config.validate()?;

        let anchors = load_anchors(&config).await?;
        info!("Loaded {} trust anchors", anchors.len());

        let bus: Arc<dyn NotificationBus> = match &config.bus {
            BusConfig::Local => Arc::new(LocalBus::new()),
            BusConfig::Redis { url } => Arc::new(RedisBus::connect(url).await?),
        };

        // Out-of-band store changes are announced like uploads
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let store = open_store(&config.store, changes_tx).await?;

        let resolver = Arc::new(ResolverService::new(store, TrustEngine::new(anchors), bus));
        spawn_change_propagation(Arc::clone(&resolver), changes_rx);

        Ok(Self {
            config: Arc::new(config),
            resolver,
        })
    }

    /// Context around an already assembled resolver
    pub fn with_resolver(config: ServerConfig, resolver: ResolverService) -> Self {
        Self {
            config: Arc::new(config),
            resolver: Arc::new(resolver),
        }
    }

    /// Stop background work; the store's watcher is released here
    pub async fn shutdown(&self) {
        self.resolver.store().close().await;
        info!("Resolver shut down");
    }
}

/// Operator token to trust: the configured one, else the nsc operator's own
fn operator_jwt_source(config: &ServerConfig) -> Option<PathBuf> {
    match (&config.trust.operator_jwt, &config.store) {
        (Some(path), _) => Some(path.clone()),
        (None, StoreConfig::Nsc { location, .. }) => nsc::operator_jwt_path(location),
        (None, _) => None,
    }
}

async fn load_anchors(config: &ServerConfig) -> ResolverResult<TrustAnchors> {
    let mut anchors = match &operator_jwt_source(config) {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                ResolverError::Config(format!("Failed to read operator JWT {:?}: {}", path, e))
            })?;
            TrustAnchors::from_operator_jwt(&raw).map_err(|e| {
                ResolverError::Config(format!("Invalid operator JWT {:?}: {}", path, e))
            })?
        }
        None => TrustAnchors::default(),
    };

    let keys = TrustAnchors::from_keys(config.trust.trusted_keys.iter().cloned())
        .map_err(|e| ResolverError::Config(format!("Invalid trusted key: {}", e)))?;
    anchors.extend(keys);

    if anchors.is_empty() {
        return Err(ResolverError::Config("No trust anchors configured".to_string()));
    }
    Ok(anchors)
}

async fn open_store(
    config: &StoreConfig,
    changes: mpsc::UnboundedSender<String>,
) -> ResolverResult<Arc<dyn JwtStore>> {
    match config {
        StoreConfig::Directory {
            location,
            create,
            read_only,
            debounce_ms,
        } => {
            let (on_change, on_error) = store_callbacks(changes);
            let options = DirectoryStoreOptions {
                read_only: *read_only,
                create_root: *create,
                debounce: Duration::from_millis(*debounce_ms),
            };
            let store = DirectoryStore::open(location.clone(), options, on_change, on_error).await?;
            Ok(Arc::new(store))
        }
        StoreConfig::Nsc {
            location,
            debounce_ms,
        } => {
            let (on_change, on_error) = store_callbacks(changes);
            let store = NscStore::open(
                location.clone(),
                Duration::from_millis(*debounce_ms),
                on_change,
                on_error,
            )
            .await?;
            info!("Serving nsc operator directory {:?}", store.root());
            Ok(Arc::new(store))
        }
        StoreConfig::Memory { read_only: true } => {
            info!("Using read-only in-memory JWT store");
            Ok(Arc::new(MemoryStore::read_only(HashMap::new())))
        }
        StoreConfig::Memory { read_only: false } => {
            info!("Using in-memory JWT store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Change callback feeding `changes`, and an error callback that logs
fn store_callbacks(changes: mpsc::UnboundedSender<String>) -> (ChangeCallback, ErrorCallback) {
    let on_change: ChangeCallback = Arc::new(move |subject: String| {
        // Receiver only goes away during shutdown
        let _ = changes.send(subject);
    });
    let on_error: ErrorCallback = Arc::new(|e: StoreError| {
        error!("JWT store error: {}", e);
    });
    (on_change, on_error)
}

/// Announce every subject the store reports as changed on disk
///
/// Ends once the store drops its change callback, which happens on close.
fn spawn_change_propagation(
    resolver: Arc<ResolverService>,
    mut changes: mpsc::UnboundedReceiver<String>,
) {
    tokio::spawn(async move {
        while let Some(subject) = changes.recv().await {
            debug!("Store reported change for {}", subject);
            if let Err(e) = resolver.republish(&subject).await {
                warn!("Failed to announce change for {}: {}", subject, e);
            }
        }
        debug!("Change propagation stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LoggingConfig, ServiceConfig, TrustConfig},
        crypto::KeyPair,
        jwt::{codec::encode, AccountClaims, ClaimType},
    };
    use tempfile::tempdir;

    fn config(store: StoreConfig, trusted_keys: Vec<String>) -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
            },
            store,
            trust: TrustConfig {
                operator_jwt: None,
                trusted_keys,
            },
            bus: BusConfig::Local,
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    #[tokio::test]
    async fn test_rejects_missing_store_root() {
        let operator = KeyPair::new_operator();
        let store = StoreConfig::Directory {
            location: "/definitely/not/here".into(),
            create: false,
            read_only: false,
            debounce_ms: 100,
        };

        let result = AppContext::new(config(store, vec![operator.public_key()])).await;
        assert!(matches!(result, Err(ResolverError::Config(_))));
    }

    #[tokio::test]
    async fn test_rejects_invalid_trusted_key() {
        let store = StoreConfig::Memory { read_only: false };
        let result = AppContext::new(config(store, vec!["not-a-key".to_string()])).await;
        assert!(matches!(result, Err(ResolverError::Config(_))));
    }

    #[tokio::test]
    async fn test_loads_operator_jwt_anchors() {
        let dir = tempdir().unwrap();
        let operator = KeyPair::new_operator();
        let mut claims = crate::jwt::OperatorClaims::new(ClaimType::Operator, operator.public_key());
        let operator_jwt = encode(&mut claims, &operator).unwrap();
        let path = dir.path().join("operator.jwt");
        std::fs::write(&path, &operator_jwt).unwrap();

        let mut config = config(StoreConfig::Memory { read_only: false }, Vec::new());
        config.trust.operator_jwt = Some(path);

        let ctx = AppContext::new(config).await.unwrap();
        assert_eq!(ctx.resolver.operator_jwt(), Some(operator_jwt.as_str()));

        let account = KeyPair::new_account();
        let mut claims = AccountClaims::new(ClaimType::Account, account.public_key());
        let jwt = encode(&mut claims, &operator).unwrap();
        ctx.resolver
            .upload_account(&account.public_key(), jwt.as_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_changes_are_announced() {
        let operator = KeyPair::new_operator();
        let account = KeyPair::new_account();
        let store = Arc::new(MemoryStore::new());
        let bus = LocalBus::new();
        let mut notifications = bus.subscribe();
        let resolver = Arc::new(ResolverService::new(
            store.clone(),
            TrustEngine::new(TrustAnchors::from_keys([operator.public_key()]).unwrap()),
            Arc::new(bus.clone()),
        ));

        let mut claims = AccountClaims::new(ClaimType::Account, account.public_key());
        let jwt = encode(&mut claims, &operator).unwrap();
        store.save(&account.public_key(), &jwt).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_change_propagation(resolver, rx);
        tx.send("not-an-account".to_string()).unwrap();
        tx.send(account.public_key()).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            msg.subject,
            format!("$SYS.ACCOUNT.{}.CLAIMS.UPDATE", account.public_key())
        );
        assert_eq!(msg.payload, jwt.as_bytes());
    }

    #[tokio::test]
    async fn test_nsc_store_trusts_its_operator() {
        let dir = tempdir().unwrap();
        let operator_dir = dir.path().join("x");
        let operator = KeyPair::new_operator();
        let mut claims = crate::jwt::OperatorClaims::new(ClaimType::Operator, operator.public_key());
        let operator_jwt = encode(&mut claims, &operator).unwrap();

        let account = KeyPair::new_account();
        let mut claims = AccountClaims::new(ClaimType::Account, account.public_key());
        let jwt = encode(&mut claims, &operator).unwrap();
        let account_dir = operator_dir.join("accounts").join("foo");
        std::fs::create_dir_all(&account_dir).unwrap();
        std::fs::write(operator_dir.join("x.jwt"), &operator_jwt).unwrap();
        std::fs::write(account_dir.join("foo.jwt"), &jwt).unwrap();

        let store = StoreConfig::Nsc {
            location: operator_dir,
            debounce_ms: 100,
        };
        let ctx = AppContext::new(config(store, Vec::new())).await.unwrap();
        assert_eq!(ctx.resolver.operator_jwt(), Some(operator_jwt.as_str()));
        assert!(ctx.resolver.store().is_read_only());
        assert_eq!(ctx.resolver.list_accounts().await, vec![account.public_key()]);
        assert!(matches!(
            ctx.resolver
                .upload_account(&account.public_key(), jwt.as_bytes())
                .await,
            Err(ResolverError::ReadOnly)
        ));

        ctx.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_directory_store_with_shutdown() {
        let dir = tempdir().unwrap();
        let operator = KeyPair::new_operator();
        let store = StoreConfig::Directory {
            location: dir.path().to_path_buf(),
            create: false,
            read_only: false,
            debounce_ms: 100,
        };

        let ctx = AppContext::new(config(store, vec![operator.public_key()]))
            .await
            .unwrap();
        assert!(!ctx.resolver.store().is_read_only());
        ctx.shutdown().await;
    }
}
