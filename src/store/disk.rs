/// Directory-backed JWT store
use crate::{
    jwt::{self, AccountFields},
    store::{
        digest, is_valid_subject,
        watcher::{self, WatcherHandle},
        ChangeCallback, ContentDigest, ErrorCallback, JwtStore, StoreError, StoreResult,
    },
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Number of leading subject characters naming the shard directory
const SHARD_WIDTH: usize = 3;

const JWT_EXTENSION: &str = "jwt";

/// Directory of an nsc operator tree holding one directory per account
const NSC_ACCOUNTS_DIR: &str = "accounts";

/// Options for opening a [`DirectoryStore`]
#[derive(Debug, Clone)]
pub struct DirectoryStoreOptions {
    /// Reject every `save`
    pub read_only: bool,

    /// Create the root directory when it does not exist
    pub create_root: bool,

    /// Quiet period the watcher waits for before reconciling a batch
    pub debounce: Duration,
}

impl Default for DirectoryStoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            create_root: false,
            debounce: Duration::from_secs(1),
        }
    }
}

/// How token files are arranged under a store root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scheme {
    /// {root}/{first 3 chars}/{subject}.jwt, keyed by subject.
    /// For example, "ADZB..." -> {root}/ADZ/ADZB....jwt
    Sharded,
    /// nsc operator tree: {root}/accounts/{name}/{name}.jwt, keyed by
    /// account name; the subject comes from the token itself
    Nsc,
}

/// Maps file keys to file locations
///
/// Token files live one level below a containers directory: shard
/// directories for the sharded scheme, account directories for nsc.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    root: PathBuf,
    containers: PathBuf,
    scheme: Scheme,
}

impl Layout {
    pub fn sharded(root: PathBuf) -> Self {
        Self {
            containers: root.clone(),
            root,
            scheme: Scheme::Sharded,
        }
    }

    pub fn nsc(root: PathBuf) -> Self {
        Self {
            containers: root.join(NSC_ACCOUNTS_DIR),
            root,
            scheme: Scheme::Nsc,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn containers(&self) -> &Path {
        &self.containers
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn container_name<'a>(&self, key: &'a str) -> &'a str {
        match self.scheme {
            Scheme::Sharded if key.len() >= SHARD_WIDTH => &key[..SHARD_WIDTH],
            Scheme::Sharded => "_",
            Scheme::Nsc => key,
        }
    }

    /// Location of the file for `key`; the key must be valid
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.containers
            .join(self.container_name(key))
            .join(format!("{}.{}", key, JWT_EXTENSION))
    }

    /// Where `subject` lives before the index has seen it, if derivable
    pub fn derived_path(&self, subject: &str) -> Option<PathBuf> {
        match self.scheme {
            Scheme::Sharded => Some(self.path_for(subject)),
            Scheme::Nsc => None,
        }
    }

    /// Key stored at `path`, if `path` is exactly where that key belongs
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }
        let key = name.strip_suffix(JWT_EXTENSION)?.strip_suffix('.')?;
        if self.scheme == Scheme::Sharded && !is_valid_subject(key) {
            return None;
        }
        if path != self.path_for(key) {
            debug!("Ignoring misplaced token file {:?}", path);
            return None;
        }
        Some(key.to_string())
    }

    /// Subject described by the file stored under `key`
    pub fn subject_of(&self, key: &str, path: &Path, content: &[u8]) -> StoreResult<String> {
        if self.scheme == Scheme::Sharded {
            return Ok(key.to_string());
        }

        let unreadable = |reason: String| StoreError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::str::from_utf8(content).map_err(|e| unreadable(e.to_string()))?;
        let token = jwt::decode::<AccountFields>(text.trim())
            .map_err(|e| unreadable(e.to_string()))?;
        Ok(token.claims.sub)
    }

    /// Token files directly inside one container directory
    pub async fn files_in(&self, container: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(container).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(key) = self.key_for(&path) {
                files.push((key, path));
            }
        }
        Ok(files)
    }

    /// Token files in every container; a missing containers directory is empty
    pub async fn all_files(&self) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut containers = match fs::read_dir(&self.containers).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };
        while let Some(container) = containers.next_entry().await? {
            if container.file_type().await?.is_dir() {
                files.extend(self.files_in(&container.path()).await?);
            }
        }
        Ok(files)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub path: PathBuf,
    pub digest: ContentDigest,
}

/// State shared between the store and its watcher
///
/// `index` holds the digest of what is on disk for each subject.
/// `own_writes` records the digest of every `save` until the watcher has
/// seen it, so this instance's writes are not reported as external.
pub(crate) struct Shared {
    pub layout: Layout,
    pub index: RwLock<HashMap<String, IndexEntry>>,
    pub own_writes: Mutex<HashMap<String, ContentDigest>>,
}

/// Filesystem store: one file per subject under a sharded tree
///
/// The filesystem is the source of truth. Other processes may add or
/// replace token files; a background watcher notices, debounces bursts,
/// reconciles the in-memory index and reports each changed subject once
/// per batch through the change callback.
pub struct DirectoryStore {
    shared: Arc<Shared>,
    read_only: bool,
    write_lock: Mutex<()>,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl DirectoryStore {
    /// Open a writable store rooted at an existing directory
    pub async fn new(
        root: impl Into<PathBuf>,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> StoreResult<Self> {
        Self::open(root, DirectoryStoreOptions::default(), on_change, on_error).await
    }

    /// Open a store with explicit options
    ///
    /// Fails with `InvalidRoot` when the root is missing (and not created),
    /// not a directory, or unreadable.
    pub async fn open(
        root: impl Into<PathBuf>,
        options: DirectoryStoreOptions,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> StoreResult<Self> {
        let root = prepare_root(root.into(), options.create_root).await?;
        Self::start(Layout::sharded(root), options, on_change, on_error).await
    }

    /// Index `layout` and start watching it
    pub(crate) async fn start(
        layout: Layout,
        options: DirectoryStoreOptions,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> StoreResult<Self> {
        // Watch before scanning so nothing written in between is missed;
        // the watcher is dropped with this frame if the scan fails.
        let (raw_watcher, events) = watcher::watch(layout.root())?;
        let index = scan(&layout).await?;

        info!(
            "Opened JWT directory store at {:?} ({:?} layout, {} tokens, read_only={})",
            layout.root(),
            layout.scheme(),
            index.len(),
            options.read_only
        );

        let shared = Arc::new(Shared {
            layout,
            index: RwLock::new(index),
            own_writes: Mutex::new(HashMap::new()),
        });

        let handle = watcher::spawn(
            raw_watcher,
            events,
            Arc::clone(&shared),
            options.debounce,
            on_change,
            on_error,
        );

        Ok(Self {
            shared,
            read_only: options.read_only,
            write_lock: Mutex::new(()),
            watcher: Mutex::new(Some(handle)),
        })
    }

    pub fn root(&self) -> &Path {
        self.shared.layout.root()
    }
}

pub(crate) async fn prepare_root(root: PathBuf, create: bool) -> StoreResult<PathBuf> {
    let invalid = |reason: String| StoreError::InvalidRoot {
        path: root.clone(),
        reason,
    };

    if create {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| invalid(format!("cannot create: {}", e)))?;
    }

    let metadata = fs::metadata(&root).await.map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    fs::read_dir(&root)
        .await
        .map_err(|e| invalid(format!("not readable: {}", e)))?;

    fs::canonicalize(&root)
        .await
        .map_err(|e| invalid(e.to_string()))
}

/// Build the index from every token file under the root
///
/// Files whose subject cannot be read are skipped; the watcher reports
/// them once they change.
async fn scan(layout: &Layout) -> StoreResult<HashMap<String, IndexEntry>> {
    let mut index = HashMap::new();

    for (key, path) in layout.all_files().await? {
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let subject = match layout.subject_of(&key, &path, &content) {
            Ok(subject) => subject,
            Err(e) => {
                warn!("Skipping {}", e);
                continue;
            }
        };
        index.insert(
            subject,
            IndexEntry {
                path,
                digest: digest(&content),
            },
        );
    }

    Ok(index)
}

#[async_trait]
impl JwtStore for DirectoryStore {
    async fn load(&self, subject: &str) -> StoreResult<String> {
        if !is_valid_subject(subject) {
            return Err(StoreError::NotFound(subject.to_string()));
        }

        // Saves not yet reconciled are still found at their derived path
        let indexed = self
            .shared
            .index
            .read()
            .await
            .get(subject)
            .map(|entry| entry.path.clone());
        let path = indexed
            .or_else(|| self.shared.layout.derived_path(subject))
            .ok_or_else(|| StoreError::NotFound(subject.to_string()))?;

        match fs::read_to_string(&path).await {
            Ok(token) => Ok(token),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(subject.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, subject: &str, token: &str) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        if !is_valid_subject(subject) {
            return Err(StoreError::InvalidSubject(subject.to_string()));
        }

        let _guard = self.write_lock.lock().await;

        let path = self.shared.layout.path_for(subject);
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::InvalidSubject(subject.to_string()))?;
        fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(".{}.{}.tmp", subject, Uuid::new_v4()));
        if let Err(e) = write_synced(&tmp, token.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.shared
            .own_writes
            .lock()
            .await
            .insert(subject.to_string(), digest(token.as_bytes()));

        if let Err(e) = fs::rename(&tmp, &path).await {
            warn!("Failed to move {:?} into place: {}", tmp, e);
            self.shared.own_writes.lock().await.remove(subject);
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Saved JWT for {} to {:?}", subject, path);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.shared.index.read().await.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    async fn close(&self) {
        if let Some(handle) = self.watcher.lock().await.take() {
            handle.stop().await;
            info!("Closed JWT directory store at {:?}", self.root());
        }
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    Ok(())
}
