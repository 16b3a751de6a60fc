/// Account resolver HTTP tests
/// Runs the full router on an ephemeral port against a directory store
use account_resolver::{
    bus::LocalBus,
    config::{BusConfig, LoggingConfig, ServerConfig, ServiceConfig, StoreConfig, TrustConfig},
    crypto::KeyPair,
    jwt::{codec::encode, AccountClaims, ClaimType},
    server::build_router,
    store::{DirectoryStore, DirectoryStoreOptions, JwtStore, StoreError},
    trust::{TrustAnchors, TrustEngine},
    AppContext, ResolverService,
};
use reqwest::{header, StatusCode};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

struct TestServer {
    base_url: String,
    operator: KeyPair,
    bus: LocalBus,
    store: Arc<DirectoryStore>,
    client: reqwest::Client,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let operator = KeyPair::new_operator();
        let bus = LocalBus::new();

        let options = DirectoryStoreOptions {
            debounce: Duration::from_millis(100),
            ..Default::default()
        };
        let store = Arc::new(
            DirectoryStore::open(dir.path(), options, Arc::new(|_: String| {}), Arc::new(|_: StoreError| {}))
                .await
                .unwrap(),
        );

        let anchors = TrustAnchors::from_keys([operator.public_key()]).unwrap();
        let resolver = ResolverService::new(
            store.clone(),
            TrustEngine::new(anchors),
            Arc::new(bus.clone()),
        );

        let config = ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
            },
            store: StoreConfig::Directory {
                location: dir.path().to_path_buf(),
                create: false,
                read_only: false,
                debounce_ms: 100,
            },
            trust: TrustConfig {
                operator_jwt: None,
                trusted_keys: vec![operator.public_key()],
            },
            bus: BusConfig::Local,
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        };
        let ctx = AppContext::with_resolver(config, resolver);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(ctx)).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            operator,
            bus,
            store,
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn account_jwt(&self, account: &KeyPair, exp: i64) -> String {
        let mut claims = AccountClaims::new(ClaimType::Account, account.public_key());
        claims.exp = exp;
        encode(&mut claims, &self.operator).unwrap()
    }

    async fn upload(&self, subject: &str, jwt: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/jwt/v1/accounts/{}", subject)))
            .body(jwt.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::test]
async fn test_upload_and_fetch_with_notification() {
    let server = TestServer::start().await;
    let mut notifications = server.bus.subscribe();
    let account = KeyPair::new_account();
    let subject = account.public_key();
    let jwt = server.account_jwt(&account, 0);

    let resp = server.upload(&subject, &jwt).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let msg = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.subject, format!("$SYS.ACCOUNT.{}.CLAIMS.UPDATE", subject));
    assert_eq!(msg.payload, jwt.as_bytes());

    let resp = server.get(&format!("/jwt/v1/accounts/{}", subject)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/jwt");
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
    assert!(resp.headers().contains_key(header::ETAG));
    assert_eq!(resp.text().await.unwrap(), jwt);
}

#[tokio::test]
async fn test_list_accounts() {
    let server = TestServer::start().await;

    let resp = server.get("/jwt/v1/accounts").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.json::<Vec<String>>().await.unwrap().is_empty());

    let mut expected = Vec::new();
    for _ in 0..2 {
        let account = KeyPair::new_account();
        let jwt = server.account_jwt(&account, 0);
        assert_eq!(server.upload(&account.public_key(), &jwt).await.status(), StatusCode::OK);
        expected.push(account.public_key());
    }
    expected.sort();

    // The listing follows the store's watcher, one debounce window behind
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let listed: Vec<String> = server.get("/jwt/v1/accounts").await.json().await.unwrap();
        if listed == expected || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for path in ["/jwt/v1/accounts", "/jwt/v1/accounts/"] {
        let listed: Vec<String> = server.get(path).await.json().await.unwrap();
        assert_eq!(listed, expected);
    }
}

#[tokio::test]
async fn test_fetch_modifiers() {
    let server = TestServer::start().await;
    let account = KeyPair::new_account();
    let subject = account.public_key();
    let jwt = server.account_jwt(&account, 0);
    server.upload(&subject, &jwt).await;

    let resp = server
        .get(&format!("/jwt/v1/accounts/{}?text=true", subject))
        .await;
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(resp.text().await.unwrap(), jwt);

    let resp = server
        .get(&format!("/jwt/v1/accounts/{}?decode=true", subject))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let decoded = resp.text().await.unwrap();
    assert!(decoded.contains("\"alg\": \"ed25519\""));
    assert!(decoded.contains(&subject));

    let resp = server
        .get(&format!("/jwt/v1/accounts/{}?check=true", subject))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), jwt);

    let mut notifications = server.bus.subscribe();
    let resp = server
        .get(&format!("/jwt/v1/accounts/{}?notify=true", subject))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let msg = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload, jwt.as_bytes());
}

#[tokio::test]
async fn test_rejected_uploads() {
    let server = TestServer::start().await;
    let account = KeyPair::new_account();
    let subject = account.public_key();

    let resp = server.upload(&subject, "hello").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let mut claims = AccountClaims::new(ClaimType::Account, subject.clone());
    let self_signed = encode(&mut claims, &account).unwrap();
    let resp = server.upload(&subject, &self_signed).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let stranger = KeyPair::new_operator();
    let mut claims = AccountClaims::new(ClaimType::Account, subject.clone());
    let foreign = encode(&mut claims, &stranger).unwrap();
    let resp = server.upload(&subject, &foreign).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let expired = server.account_jwt(&account, now() - 10);
    let resp = server.upload(&subject, &expired).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.text().await.unwrap().contains("expired"));

    let resp = server.get(&format!("/jwt/v1/accounts/{}", subject)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_check_hides_token_after_expiry() {
    let server = TestServer::start().await;
    let account = KeyPair::new_account();
    let subject = account.public_key();
    let jwt = server.account_jwt(&account, now() + 2);

    assert_eq!(server.upload(&subject, &jwt).await.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_secs(4)).await;

    let resp = server.get(&format!("/jwt/v1/accounts/{}", subject)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), jwt);

    let resp = server
        .get(&format!("/jwt/v1/accounts/{}?check=true", subject))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conditional_get() {
    let server = TestServer::start().await;
    let account = KeyPair::new_account();
    let subject = account.public_key();
    let jwt = server.account_jwt(&account, 0);
    server.upload(&subject, &jwt).await;

    let path = format!("/jwt/v1/accounts/{}", subject);
    let first = server.get(&path).await;
    let second = server.get(&path).await;
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_string();
    assert_eq!(second.headers()[header::ETAG], etag.as_str());

    let resp = server
        .client
        .get(server.url(&path))
        .header(header::IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert!(resp.text().await.unwrap().is_empty());

    // A new upload changes the validator
    let replacement = server.account_jwt(&account, now() + 3600);
    server.upload(&subject, &replacement).await;
    let resp = server
        .client
        .get(server.url(&path))
        .header(header::IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), replacement);
}

#[tokio::test]
async fn test_unknown_urls() {
    let server = TestServer::start().await;

    let resp = server.get("/jwt/v1/accounts/NOTTHERE").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server.get("/jwt/v1/nothing").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "NotFound");

    // Only raw keys were configured
    let resp = server.get("/jwt/v1/operator").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_service_endpoints() {
    let server = TestServer::start().await;

    for path in ["/health", "/healthz"] {
        let resp = server.get(path).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    let resp = server.get("/jwt/v1/help").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("/jwt/v1/accounts"));

    let resp = server.get("/metrics").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("resolver_uptime_seconds"));
}

#[tokio::test]
async fn test_upload_lands_on_disk() {
    let server = TestServer::start().await;
    let account = KeyPair::new_account();
    let subject = account.public_key();
    let jwt = server.account_jwt(&account, 0);
    server.upload(&subject, &jwt).await;

    let on_disk = server
        .store
        .root()
        .join(&subject[..3])
        .join(format!("{}.jwt", subject));
    assert_eq!(std::fs::read_to_string(on_disk).unwrap(), jwt);
    assert_eq!(server.store.load(&subject).await.unwrap(), jwt);
}
