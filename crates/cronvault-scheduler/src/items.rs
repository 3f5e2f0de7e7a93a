//! Item store: one bincode record per command, next to the catalog file.
//! Each record is guarded by its own lock, created lazily on first access.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cronvault_core::{CronvaultError, Result};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::encoding::{read_native, write_native};
use crate::tasks::CommandSpec;

/// Per-command record storage owned by one scheduler store.
pub struct ItemStore {
    dir: PathBuf,
    /// Lock arena: item id → record lock. Scoped to this store instance.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ItemStore {
    /// Create an item store rooted at the given directory.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            locks: DashMap::new(),
        }
    }

    /// Path of the record for `id`.
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.item"))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load a single command record.
    pub async fn load(&self, id: &str) -> Result<CommandSpec> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        read_native(&self.path(id)).await
    }

    /// Save a single command record.
    pub async fn save(&self, id: &str, spec: &CommandSpec) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        write_native(&self.path(id), spec).await?;
        tracing::debug!("💾 Saved item {id}");
        Ok(())
    }

    /// Delete a single command record.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let path = self.path(id);
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CronvaultError::NotFound(path.display().to_string()),
            _ => CronvaultError::Io(e),
        })?;
        tracing::debug!("🗑️ Deleted item {id}");
        Ok(())
    }

    /// Number of locks created so far.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Drop every lock of this store at once.
    pub fn release_all(&self) {
        self.locks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Computable, ExecutionContext};
    use crate::tasks::Payload;

    struct Noop;

    #[async_trait::async_trait]
    impl Computable for Noop {
        async fn compute(&self, _ctx: &mut ExecutionContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_save_and_load_shell_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let items = ItemStore::new(dir.path());

        let shell = CommandSpec::periodic("24h", Payload::shell("echo hi")).unwrap();
        items.save("a", &shell).await.unwrap();
        assert_eq!(items.load("a").await.unwrap(), shell);

        let argv = CommandSpec::repeating(3, Payload::argv(["ls", "-l"]).unwrap());
        items.save("b", &argv).await.unwrap();
        assert_eq!(items.load("b").await.unwrap(), argv);
    }

    #[tokio::test]
    async fn test_function_payloads_fail_to_save() {
        let dir = tempfile::tempdir().unwrap();
        let items = ItemStore::new(dir.path());

        let callback = CommandSpec::new(Payload::callback(|_| Ok(())));
        let err = items.save("cb", &callback).await.unwrap_err();
        assert!(matches!(err, CronvaultError::Encode(_)));

        let computable = CommandSpec::new(Payload::computable(Noop));
        let err = items.save("cp", &computable).await.unwrap_err();
        assert!(matches!(err, CronvaultError::Encode(_)));
        assert!(!items.path("cp").exists());
    }

    #[tokio::test]
    async fn test_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let items = ItemStore::new(dir.path());

        assert!(matches!(items.load("ghost").await, Err(CronvaultError::NotFound(_))));

        let spec = CommandSpec::new(Payload::shell("true"));
        items.save("x", &spec).await.unwrap();
        items.delete("x").await.unwrap();
        assert!(matches!(items.load("x").await, Err(CronvaultError::NotFound(_))));
        assert!(matches!(items.delete("x").await, Err(CronvaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_locks_are_lazy_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let items = ItemStore::new(dir.path());
        assert_eq!(items.lock_count(), 0);

        let _ = items.load("one").await;
        let _ = items.load("two").await;
        let _ = items.load("one").await;
        assert_eq!(items.lock_count(), 2);

        items.release_all();
        assert_eq!(items.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_saves_same_item() {
        let dir = tempfile::tempdir().unwrap();
        let items = Arc::new(ItemStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let items = items.clone();
            handles.push(tokio::spawn(async move {
                let spec = CommandSpec::new(Payload::shell(format!("echo {i}")));
                items.save("shared", &spec).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let spec = items.load("shared").await.unwrap();
        assert!(matches!(spec.payload, Payload::Shell(ref s) if s.starts_with("echo ")));
    }
}
