/// Debounced filesystem watcher for the directory store
use crate::{
    metrics,
    store::{
        digest,
        disk::{IndexEntry, Shared},
        ChangeCallback, ErrorCallback, StoreError, StoreResult,
    },
};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    collections::{BTreeMap, HashSet},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, error, warn};

pub(crate) type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Start watching `root` recursively; raw events arrive on the receiver
pub(crate) fn watch(root: &Path) -> StoreResult<(RecommendedWatcher, EventReceiver)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // Receiver gone means the store is shutting down
        let _ = tx.send(res);
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

/// Running watcher task; dropping it also stops the task
pub(crate) struct WatcherHandle {
    watcher: RecommendedWatcher,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop raw events, then wait for the reconcile loop to exit
    pub async fn stop(self) {
        let WatcherHandle {
            watcher,
            shutdown,
            task,
        } = self;
        drop(watcher);
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("JWT store watcher task panicked: {}", e);
            }
        }
    }
}

pub(crate) fn spawn(
    watcher: RecommendedWatcher,
    events: EventReceiver,
    shared: Arc<Shared>,
    debounce: Duration,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
) -> WatcherHandle {
    let (shutdown, shutdown_rx) = oneshot::channel();
    let reconciler = Reconciler {
        shared,
        on_change,
        on_error,
    };
    let task = tokio::spawn(reconciler.run(events, shutdown_rx, debounce));

    WatcherHandle {
        watcher,
        shutdown,
        task,
    }
}

struct Reconciler {
    shared: Arc<Shared>,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

impl Reconciler {
    /// Collect paths until the tree has been quiet for `debounce`, then reconcile
    async fn run(
        self,
        mut events: EventReceiver,
        mut shutdown: oneshot::Receiver<()>,
        debounce: Duration,
    ) {
        let mut pending: HashSet<PathBuf> = HashSet::new();
        let quiet = time::sleep(debounce);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        if self.absorb(event, &mut pending) {
                            quiet.as_mut().reset(Instant::now() + debounce);
                        }
                    }
                    Some(Err(e)) => self.report(StoreError::Watch(e)),
                    None => break,
                },

                _ = &mut quiet, if !pending.is_empty() => {
                    let batch = std::mem::take(&mut pending);
                    self.reconcile(batch).await;
                }
            }
        }

        debug!("JWT store watcher stopped for {:?}", self.shared.layout.root());
    }

    /// Add the relevant paths of `event` to the pending batch
    fn absorb(&self, event: Event, pending: &mut HashSet<PathBuf>) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }

        let root = self.shared.layout.root();
        let mut relevant = false;
        for path in event.paths {
            if path == root || !path.starts_with(root) {
                continue;
            }
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(true, |name| name.starts_with('.'));
            if hidden {
                continue;
            }
            pending.insert(path);
            relevant = true;
        }
        relevant
    }

    async fn reconcile(&self, batch: HashSet<PathBuf>) {
        let targets = self.collect(batch).await;
        debug!("Reconciling {} JWT store entries", targets.len());

        for (key, path) in targets {
            self.reconcile_file(key, path).await;
        }
    }

    /// Resolve a batch of raw paths to the token files they affect, by key
    async fn collect(&self, batch: HashSet<PathBuf>) -> BTreeMap<String, PathBuf> {
        let layout = &self.shared.layout;
        let mut targets = BTreeMap::new();

        for path in batch {
            if let Some(key) = layout.key_for(&path) {
                targets.insert(key, path);
                continue;
            }

            // Everything else only matters as a container or their parent
            let whole_tree = path == layout.containers();
            if !whole_tree && path.parent() != Some(layout.containers()) {
                continue;
            }

            match fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {
                    let listed = if whole_tree {
                        layout.all_files().await
                    } else {
                        layout.files_in(&path).await
                    };
                    match listed {
                        Ok(files) => targets.extend(files),
                        Err(e) => self.report(e.into()),
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let index = self.shared.index.read().await;
                    for entry in index.values() {
                        if !entry.path.starts_with(&path) {
                            continue;
                        }
                        if let Some(key) = layout.key_for(&entry.path) {
                            targets.insert(key, entry.path.clone());
                        }
                    }
                }
                Err(e) => self.report(e.into()),
            }
        }

        targets
    }

    async fn reconcile_file(&self, key: String, path: PathBuf) {
        match fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut index = self.shared.index.write().await;
                let before = index.len();
                index.retain(|_, entry| entry.path != path);
                if index.len() != before {
                    debug!("JWT at {:?} removed from store", path);
                    metrics::record_reconciliation("removed");
                }
                return;
            }
            Err(e) => return self.report(e.into()),
        }

        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => return self.report(e.into()),
        };
        let subject = match self.shared.layout.subject_of(&key, &path, &content) {
            Ok(subject) => subject,
            Err(e) => return self.report(e),
        };
        let current = digest(&content);

        {
            let mut index = self.shared.index.write().await;
            if index.get(&subject).map(|entry| entry.digest) == Some(current) {
                drop(index);
                let mut own = self.shared.own_writes.lock().await;
                if own.get(&subject) == Some(&current) {
                    own.remove(&subject);
                }
                metrics::record_reconciliation("unchanged");
                return;
            }
            // The file may have described a different subject before
            index.retain(|indexed, entry| *indexed == subject || entry.path != path);
            index.insert(
                subject.clone(),
                IndexEntry {
                    path,
                    digest: current,
                },
            );
        }

        let own_write = self.shared.own_writes.lock().await.remove(&subject) == Some(current);
        if own_write {
            debug!("JWT for {} updated by this store", subject);
            metrics::record_reconciliation("own");
            return;
        }

        debug!("JWT for {} changed on disk", subject);
        metrics::record_reconciliation("changed");
        (self.on_change)(subject);
    }

    fn report(&self, err: StoreError) {
        warn!("JWT store watcher error: {}", err);
        metrics::record_reconciliation("error");
        (self.on_error)(err);
    }
}
