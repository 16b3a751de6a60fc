/// Read-only store over an nsc operator directory
use crate::store::{
    disk::{prepare_root, DirectoryStore, DirectoryStoreOptions, Layout},
    ChangeCallback, ErrorCallback, JwtStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Account tokens kept by nsc, served read-only
///
/// nsc stores each account at `accounts/<name>/<name>.jwt` below the
/// operator directory. Tokens are looked up by the subject inside them, so
/// a token becomes loadable once the store has indexed it: at open, or
/// after the watcher's debounce window when nsc writes a new one.
pub struct NscStore {
    inner: DirectoryStore,
}

impl NscStore {
    /// Open the operator directory with the default debounce
    pub async fn new(
        operator_dir: impl Into<PathBuf>,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> StoreResult<Self> {
        let debounce = DirectoryStoreOptions::default().debounce;
        Self::open(operator_dir, debounce, on_change, on_error).await
    }

    /// Fails with `InvalidRoot` when the operator directory is missing or unreadable
    pub async fn open(
        operator_dir: impl Into<PathBuf>,
        debounce: Duration,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> StoreResult<Self> {
        let root = prepare_root(operator_dir.into(), false).await?;
        let options = DirectoryStoreOptions {
            read_only: true,
            create_root: false,
            debounce,
        };
        let inner = DirectoryStore::start(Layout::nsc(root), options, on_change, on_error).await?;
        Ok(Self { inner })
    }

    pub fn root(&self) -> &Path {
        self.inner.root()
    }

    /// The operator's own token, `<operator>/<operator>.jwt`, if nsc wrote one
    pub fn operator_jwt_path(&self) -> Option<PathBuf> {
        operator_jwt_path(self.root())
    }
}

/// Location nsc uses for the operator token inside `operator_dir`
pub fn operator_jwt_path(operator_dir: &Path) -> Option<PathBuf> {
    let name = operator_dir.file_name()?;
    let mut file = name.to_os_string();
    file.push(".jwt");
    let path = operator_dir.join(file);
    path.is_file().then_some(path)
}

#[async_trait]
impl JwtStore for NscStore {
    async fn load(&self, subject: &str) -> StoreResult<String> {
        self.inner.load(subject).await
    }

    async fn save(&self, _subject: &str, _token: &str) -> StoreResult<()> {
        Err(StoreError::ReadOnly)
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn subjects(&self) -> Vec<String> {
        self.inner.subjects().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::KeyPair,
        jwt::{codec::encode, AccountClaims, ClaimType, OperatorClaims},
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    };
    use tempfile::{tempdir, TempDir};

    const DEBOUNCE: Duration = Duration::from_millis(200);
    const SETTLE: Duration = Duration::from_millis(1200);

    /// An nsc operator tree named "x"
    struct OperatorTree {
        _dir: TempDir,
        path: PathBuf,
        operator: KeyPair,
    }

    impl OperatorTree {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let path = dir.path().join("x");
            std::fs::create_dir_all(&path).unwrap();

            let operator = KeyPair::new_operator();
            let mut claims = OperatorClaims::new(ClaimType::Operator, operator.public_key());
            let jwt = encode(&mut claims, &operator).unwrap();
            std::fs::write(path.join("x.jwt"), jwt).unwrap();

            Self {
                _dir: dir,
                path,
                operator,
            }
        }

        /// Write an account token the way nsc does
        fn store_account(&self, name: &str, account: &KeyPair, exp: i64) -> String {
            let mut claims = AccountClaims::new(ClaimType::Account, account.public_key());
            claims.name = name.to_string();
            claims.exp = exp;
            let jwt = encode(&mut claims, &self.operator).unwrap();

            let dir = self.path.join("accounts").join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.jwt", name)), &jwt).unwrap();
            jwt
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        changes: Arc<StdMutex<Vec<String>>>,
        errors: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn callbacks(&self) -> (ChangeCallback, ErrorCallback) {
            let changes = Arc::clone(&self.changes);
            let errors = Arc::clone(&self.errors);
            (
                Arc::new(move |subject: String| changes.lock().unwrap().push(subject)),
                Arc::new(move |_: StoreError| {
                    errors.fetch_add(1, Ordering::SeqCst);
                }),
            )
        }
    }

    async fn open_store(tree: &OperatorTree, recorder: &Recorder) -> NscStore {
        let (on_change, on_error) = recorder.callbacks();
        NscStore::open(&tree.path, DEBOUNCE, on_change, on_error)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_nsc_store() {
        let tree = OperatorTree::new();
        let account = KeyPair::new_account();
        let jwt = tree.store_account("foo", &account, 0);

        let store = open_store(&tree, &Recorder::default()).await;
        assert!(store.is_read_only());

        assert_eq!(store.load(&account.public_key()).await.unwrap(), jwt);
        assert_eq!(store.subjects().await, vec![account.public_key()]);

        assert!(matches!(store.load("random").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.load("").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.save("five", "onetwothree").await,
            Err(StoreError::ReadOnly)
        ));

        assert_eq!(
            store.operator_jwt_path(),
            Some(store.root().join("x.jwt"))
        );

        store.close().await;
    }

    #[tokio::test]
    async fn test_bad_folder() {
        let (on_change, on_error) = Recorder::default().callbacks();
        let result = NscStore::new("/a/b/c", on_change, on_error).await;
        assert!(matches!(result, Err(StoreError::InvalidRoot { .. })));
    }

    #[tokio::test]
    async fn test_operator_without_accounts() {
        let tree = OperatorTree::new();
        let store = open_store(&tree, &Recorder::default()).await;
        assert!(store.subjects().await.is_empty());
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_nsc_file_notifications() {
        let tree = OperatorTree::new();
        let recorder = Recorder::default();
        let store = open_store(&tree, &recorder).await;
        let account = KeyPair::new_account();

        let now = chrono::Utc::now().timestamp();
        tree.store_account("foo", &account, 0);
        tree.store_account("foo", &account, now + 3600);
        tokio::time::sleep(SETTLE).await;

        assert_eq!(*recorder.changes.lock().unwrap(), vec![account.public_key()]);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 0);

        let latest = tree.store_account("foo", &account, now + 7200);
        tokio::time::sleep(SETTLE).await;

        assert_eq!(recorder.changes.lock().unwrap().len(), 2);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 0);
        assert_eq!(store.load(&account.public_key()).await.unwrap(), latest);

        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_corrupt_account_reports_error() {
        let tree = OperatorTree::new();
        let recorder = Recorder::default();
        let store = open_store(&tree, &recorder).await;

        let dir = tree.path.join("accounts").join("bar");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bar.jwt"), "not a token").unwrap();
        tokio::time::sleep(SETTLE).await;

        assert!(recorder.errors.load(Ordering::SeqCst) >= 1);
        assert!(recorder.changes.lock().unwrap().is_empty());
        assert!(store.subjects().await.is_empty());

        store.close().await;
    }
}
