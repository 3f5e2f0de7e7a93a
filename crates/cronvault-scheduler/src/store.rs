//! Scheduler Store: owner of the catalog, the cache and the running tasks.
//! All file persistence goes through it.
//!
//! The catalog lives in a text file (JSON/YAML/TOML). Each command's full
//! definition lives next to it in `<id>.item`, and running tasks in
//! `executions.bin`. Cache commands are memory-only.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use cronvault_core::{CronvaultError, Result};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::sync::{Mutex, RwLock};

use crate::context::Reporter;
use crate::encoding::{Encoding, read_native, write_native};
use crate::engine::EngineOptions;
use crate::execution::Execution;
use crate::items::ItemStore;
use crate::tasks::{Catalog, CommandRef, CommandSpec};

/// File name of the running-tasks snapshot, next to the catalog.
pub const EXECUTIONS_FILE: &str = "executions.bin";

#[derive(Default)]
struct State {
    sync: bool,
    catalog: Vec<CommandRef>,
    cache_refs: Vec<CommandRef>,
    cache: HashMap<String, CommandSpec>,
}

pub(crate) struct Inner {
    path: PathBuf,
    dir: PathBuf,
    encoding: Encoding,
    /// Catalog + cache. Lock order: `state` before `running`.
    state: RwLock<State>,
    running: Mutex<Vec<Execution>>,
    items: ItemStore,
    reporter: StdMutex<Reporter>,
    errors: StdMutex<Option<UnboundedReceiver<CronvaultError>>>,
    warnings: StdMutex<Option<UnboundedReceiver<String>>>,
    pub(crate) active: AtomicBool,
    pub(crate) options: StdMutex<EngineOptions>,
}

/// Shared handle to one scheduler store. Clones point at the same store.
#[derive(Clone)]
pub struct SchedulerStore {
    pub(crate) inner: Arc<Inner>,
}

fn guard<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(CronvaultError::IndexOutOfBounds { index, len })
    }
}

impl SchedulerStore {
    // ── Construction ───────────────────────────────────────────────

    async fn open(path: &Path, encoding: Encoding, sync: bool) -> Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir).await?;

        let (etx, erx) = unbounded_channel();
        let (wtx, wrx) = unbounded_channel();
        let inner = Inner {
            path: path.to_path_buf(),
            items: ItemStore::new(&dir),
            dir,
            encoding,
            state: RwLock::new(State {
                sync,
                ..State::default()
            }),
            running: Mutex::new(Vec::new()),
            reporter: StdMutex::new(Reporter::new(etx, wtx)),
            errors: StdMutex::new(Some(erx)),
            warnings: StdMutex::new(Some(wrx)),
            active: AtomicBool::new(false),
            options: StdMutex::new(EngineOptions::default()),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// New store with an empty catalog and an empty running-tasks file.
    pub async fn create_empty(path: &Path, encoding: Encoding, sync: bool) -> Result<Self> {
        let store = Self::open(path, encoding, sync).await?;
        store.save().await?;
        store.save_executions().await?;
        tracing::info!("📂 Created empty catalog at {}", path.display());
        Ok(store)
    }

    /// Store loaded from an existing catalog and running-tasks file.
    pub async fn load_existing(path: &Path, encoding: Encoding, sync: bool) -> Result<Self> {
        let store = Self::open(path, encoding, sync).await?;
        store.load().await?;
        tracing::info!("📂 Loaded catalog from {}", path.display());
        Ok(store)
    }

    /// Load the existing catalog, then persist every given command.
    /// Load and add failures are collected, not returned.
    pub async fn load_with(
        path: &Path,
        encoding: Encoding,
        commands: Vec<CommandSpec>,
        sync: bool,
    ) -> Result<(Self, Vec<CronvaultError>)> {
        let store = Self::open(path, encoding, sync).await?;
        let mut errors = Vec::new();
        if let Err(e) = store.load().await {
            errors.push(e);
        }
        store.add_all(commands, &mut errors).await;
        Ok((store, errors))
    }

    /// Fresh store persisting every given command.
    /// Save and add failures are collected, not returned.
    pub async fn create_with(
        path: &Path,
        encoding: Encoding,
        commands: Vec<CommandSpec>,
        sync: bool,
    ) -> Result<(Self, Vec<CronvaultError>)> {
        let store = Self::open(path, encoding, sync).await?;
        let mut errors = Vec::new();
        if let Err(e) = store.save().await {
            errors.push(e);
        }
        if let Err(e) = store.save_executions().await {
            errors.push(e);
        }
        store.add_all(commands, &mut errors).await;
        Ok((store, errors))
    }

    async fn add_all(&self, commands: Vec<CommandSpec>, errors: &mut Vec<CronvaultError>) {
        for spec in commands {
            if let Err(e) = self.add_and_persist(spec).await {
                errors.push(e);
            }
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn catalog_path(&self) -> &Path {
        &self.inner.path
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    pub fn executions_path(&self) -> PathBuf {
        self.inner.dir.join(EXECUTIONS_FILE)
    }

    pub fn items(&self) -> &ItemStore {
        &self.inner.items
    }

    pub async fn is_sync(&self) -> bool {
        self.inner.state.read().await.sync
    }

    pub async fn set_sync(&self, sync: bool) {
        self.inner.state.write().await.sync = sync;
    }

    /// Sending side of the error and warning queues.
    pub fn reporter(&self) -> Reporter {
        guard(&self.inner.reporter).clone()
    }

    /// Receiving end of the error queue. Only the first caller gets it.
    pub fn take_errors(&self) -> Option<UnboundedReceiver<CronvaultError>> {
        guard(&self.inner.errors).take()
    }

    /// Receiving end of the warning queue. Only the first caller gets it.
    pub fn take_warnings(&self) -> Option<UnboundedReceiver<String>> {
        guard(&self.inner.warnings).take()
    }

    // ── Catalog (persisted) ────────────────────────────────────────

    /// Store the command's item record, then append its ref to the catalog.
    pub async fn add_and_persist(&self, spec: CommandSpec) -> Result<String> {
        spec.validate()?;
        let cref = CommandRef::new(&spec);
        self.inner.items.save(&cref.id, &spec).await?;

        let mut state = self.inner.state.write().await;
        state.catalog.push(cref.clone());
        if let Err(e) = self.write_catalog(&state).await {
            state.catalog.pop();
            drop(state);
            let _ = self.inner.items.delete(&cref.id).await;
            return Err(e);
        }
        tracing::info!("📅 Command added: '{}' ({})", cref.label, cref.id);
        Ok(cref.id)
    }

    /// Replace the command at `index`, rewriting its item record.
    pub async fn update_and_persist(&self, spec: CommandSpec, index: usize) -> Result<()> {
        spec.validate()?;
        let mut state = self.inner.state.write().await;
        check_index(index, state.catalog.len())?;
        let id = state.catalog[index].id.clone();
        self.inner.items.save(&id, &spec).await?;
        state.catalog[index].touch(&spec);
        self.write_catalog(&state).await?;
        tracing::info!("✏️ Command updated: '{}' ({id})", state.catalog[index].label);
        Ok(())
    }

    /// Remove the command at `index` with its item record and execution.
    pub async fn delete_and_persist(&self, index: usize) -> Result<()> {
        let mut state = self.inner.state.write().await;
        check_index(index, state.catalog.len())?;
        let id = state.catalog[index].id.clone();
        match self.inner.items.delete(&id).await {
            Ok(()) | Err(CronvaultError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let cref = state.catalog.remove(index);
        self.write_catalog(&state).await?;
        drop(state);

        self.forget_execution(&id).await;
        self.save_executions().await?;
        tracing::info!("🗑️ Command removed: '{}' ({id})", cref.label);
        Ok(())
    }

    // ── Cache (memory only) ────────────────────────────────────────

    pub async fn add_to_cache(&self, spec: CommandSpec) -> Result<String> {
        spec.validate()?;
        let cref = CommandRef::new(&spec);
        let id = cref.id.clone();
        let mut state = self.inner.state.write().await;
        state.cache.insert(id.clone(), spec);
        tracing::info!("📅 Cache command added: '{}' ({id})", cref.label);
        state.cache_refs.push(cref);
        Ok(id)
    }

    pub async fn update_to_cache(&self, spec: CommandSpec, index: usize) -> Result<()> {
        spec.validate()?;
        let mut state = self.inner.state.write().await;
        check_index(index, state.cache_refs.len())?;
        state.cache_refs[index].touch(&spec);
        let id = state.cache_refs[index].id.clone();
        state.cache.insert(id, spec);
        Ok(())
    }

    pub async fn delete_from_cache(&self, index: usize) -> Result<()> {
        let mut state = self.inner.state.write().await;
        check_index(index, state.cache_refs.len())?;
        let cref = state.cache_refs.remove(index);
        state.cache.remove(&cref.id);
        drop(state);

        self.forget_execution(&cref.id).await;
        tracing::info!("🗑️ Cache command removed: '{}' ({})", cref.label, cref.id);
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Cache specs, then every catalog spec. Unreadable records are skipped.
    pub async fn planned(&self) -> Vec<CommandSpec> {
        let state = self.inner.state.read().await;
        let mut out: Vec<CommandSpec> = state
            .cache_refs
            .iter()
            .filter_map(|r| state.cache.get(&r.id).cloned())
            .collect();
        for cref in &state.catalog {
            if let Some(spec) = state.cache.get(&cref.id) {
                out.push(spec.clone());
                continue;
            }
            match self.inner.items.load(&cref.id).await {
                Ok(spec) => out.push(spec),
                Err(e) => tracing::warn!("⚠️ Skipping command {}: {e}", cref.id),
            }
        }
        out
    }

    pub async fn references(&self) -> Vec<CommandRef> {
        self.inner.state.read().await.catalog.clone()
    }

    pub async fn cache_references(&self) -> Vec<CommandRef> {
        self.inner.state.read().await.cache_refs.clone()
    }

    /// Tracked executions.
    pub async fn running(&self) -> Vec<Execution> {
        self.inner.running.lock().await.clone()
    }

    pub async fn is_tracked(&self, id: &str) -> bool {
        self.inner.running.lock().await.iter().any(|e| e.id == id)
    }

    /// Executions of known commands that are due now.
    pub async fn next_running_tasks(&self) -> Vec<Execution> {
        self.partition_by_due(Utc::now(), true).await
    }

    /// Executions of known commands not yet due.
    pub async fn waiting_tasks(&self) -> Vec<Execution> {
        self.partition_by_due(Utc::now(), false).await
    }

    async fn partition_by_due(&self, now: DateTime<Utc>, due: bool) -> Vec<Execution> {
        let mut out = Vec::new();
        for cref in self.all_refs().await {
            let Ok(spec) = self.resolve_spec(&cref.id).await else {
                continue;
            };
            let exec = self
                .with_execution(&cref.id, spec, now, |e| {
                    e.update_next_at(now);
                    (e.is_due_at(now) == due).then(|| e.clone())
                })
                .await;
            out.extend(exec);
        }
        out
    }

    /// Catalog snapshot handed to payloads: cache refs, then catalog refs.
    pub async fn catalog_snapshot(&self) -> Catalog {
        let state = self.inner.state.read().await;
        Catalog {
            sync: state.sync,
            commands: state
                .cache_refs
                .iter()
                .chain(state.catalog.iter())
                .cloned()
                .collect(),
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Read the catalog file, then the running-tasks file.
    pub async fn load(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            let catalog = self.inner.encoding.read(&self.inner.path).await?;
            state.sync = catalog.sync;
            state.catalog = catalog.commands;
        }
        self.load_executions().await
    }

    /// Write the catalog file.
    pub async fn save(&self) -> Result<()> {
        let state = self.inner.state.read().await;
        self.write_catalog(&state).await
    }

    async fn write_catalog(&self, state: &State) -> Result<()> {
        let catalog = Catalog {
            sync: state.sync,
            commands: state.catalog.clone(),
        };
        self.inner.encoding.write(&self.inner.path, &catalog).await?;
        tracing::debug!(
            "💾 Saved {} commands to {}",
            catalog.commands.len(),
            self.inner.path.display()
        );
        Ok(())
    }

    /// Merge the running-tasks file into memory. Stored entries win unless
    /// the in-memory one is in flight; memory-only entries are kept.
    /// A stored in-flight flag belongs to a run that never finished here, so
    /// it is cleared on the way in.
    pub async fn load_executions(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        let stored: Vec<Execution> = read_native(&self.executions_path()).await?;
        for mut exec in stored {
            exec.scheduled = false;
            match running.iter_mut().find(|e| e.id == exec.id) {
                Some(current) if current.scheduled => {}
                Some(current) => *current = exec,
                None => running.push(exec),
            }
        }
        Ok(())
    }

    /// Write the running-tasks file, leaving out cache-backed executions.
    pub async fn save_executions(&self) -> Result<()> {
        let state = self.inner.state.read().await;
        let running = self.inner.running.lock().await;
        let persisted: Vec<&Execution> = running
            .iter()
            .filter(|e| !state.cache.contains_key(&e.id) && e.command.payload.is_persistable())
            .collect();
        write_native(&self.executions_path(), &persisted).await?;
        tracing::debug!("💾 Saved {} running tasks", persisted.len());
        Ok(())
    }

    /// Drop executions reporting `expired()`. Returns how many were dropped.
    pub async fn trim_expired_executions(&self) -> usize {
        let now = Utc::now();
        let mut running = self.inner.running.lock().await;
        let before = running.len();
        running.retain_mut(|e| !e.expired_at(now));
        before - running.len()
    }

    /// Shut the store down: stop the engine, optionally persist the catalog
    /// and the pruned running tasks, release every item lock and close both
    /// queues.
    pub async fn destroy(self, save_state: bool) -> Result<()> {
        if self.is_running()
            && let Err(e) = self.stop()
        {
            self.reporter().error(e);
        }

        let mut result = Ok(());
        let mut trimmed = 0;
        if save_state {
            if let Err(e) = self.save().await {
                result = Err(e);
            }
            trimmed = self.trim_expired_executions().await;
            if let Err(e) = self.save_executions().await
                && result.is_ok()
            {
                result = Err(e);
            }
        }

        self.inner.items.release_all();
        *guard(&self.inner.reporter) = Reporter::detached();
        guard(&self.inner.errors).take();
        guard(&self.inner.warnings).take();
        *self.inner.state.write().await = State::default();
        self.inner.running.lock().await.clear();

        tracing::info!("🧹 Store at {} destroyed ({trimmed} expired runs trimmed)", self.inner.path.display());
        result
    }

    // ── Engine support ─────────────────────────────────────────────

    /// Every ref, cache first, then catalog.
    pub(crate) async fn all_refs(&self) -> Vec<CommandRef> {
        let state = self.inner.state.read().await;
        state
            .cache_refs
            .iter()
            .chain(state.catalog.iter())
            .cloned()
            .collect()
    }

    /// Cached spec for `id`, else its item record.
    pub(crate) async fn resolve_spec(&self, id: &str) -> Result<CommandSpec> {
        if let Some(spec) = self.inner.state.read().await.cache.get(id) {
            return Ok(spec.clone());
        }
        self.inner.items.load(id).await
    }

    /// Run `f` on the tracked execution of `id`, registering a new one built
    /// from `spec` when untracked. An idle execution picks up `spec` as its
    /// command snapshot.
    pub(crate) async fn with_execution<R>(
        &self,
        id: &str,
        spec: CommandSpec,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Execution) -> R,
    ) -> R {
        let mut running = self.inner.running.lock().await;
        let pos = match running.iter().position(|e| e.id == id) {
            Some(pos) => {
                if !running[pos].scheduled {
                    running[pos].command = spec;
                }
                pos
            }
            None => {
                running.push(Execution::new_at(id, spec, now));
                running.len() - 1
            }
        };
        f(&mut running[pos])
    }

    /// Bookkeeping once a run is over. A deleted command is ignored.
    pub(crate) async fn finish_run(
        &self,
        id: &str,
        context: HashMap<String, serde_json::Value>,
        started: DateTime<Utc>,
        completed: DateTime<Utc>,
    ) {
        let mut state = self.inner.state.write().await;
        let mut running = self.inner.running.lock().await;
        let Some(exec) = running.iter_mut().find(|e| e.id == id) else {
            return;
        };
        exec.record_run(completed);
        exec.context = context;
        exec.scheduled = false;
        let first = exec.times == 1;

        let State {
            catalog, cache_refs, ..
        } = &mut *state;
        if let Some(cref) = cache_refs.iter_mut().chain(catalog.iter_mut()).find(|r| r.id == id) {
            if first {
                cref.first_run = started;
            }
            cref.last_run = completed;
        }
    }

    async fn forget_execution(&self, id: &str) {
        self.inner.running.lock().await.retain(|e| e.id != id);
    }

    /// Ids of cache commands.
    pub async fn cache_ids(&self) -> HashSet<String> {
        self.inner.state.read().await.cache.keys().cloned().collect()
    }
}
