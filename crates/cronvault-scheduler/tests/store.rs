use std::path::Path;

use cronvault_core::CronvaultError;
use cronvault_scheduler::{CommandSpec, Encoding, Payload, SchedulerStore};

async fn store_with(dir: &Path, labels: &[&str]) -> (SchedulerStore, Vec<String>) {
    let store = SchedulerStore::create_empty(&dir.join("config.yaml"), Encoding::Yaml, false)
        .await
        .unwrap();
    let mut ids = Vec::new();
    for label in labels {
        let spec = CommandSpec::periodic("24h", Payload::shell(*label)).unwrap();
        ids.push(store.add_and_persist(spec).await.unwrap());
    }
    (store, ids)
}

#[tokio::test]
async fn delete_shifts_later_refs_and_drops_execution() {
    let dir = tempfile::tempdir().unwrap();
    let (store, ids) = store_with(dir.path(), &["echo a", "echo b", "echo c"]).await;
    store.next_running_tasks().await;
    assert!(store.is_tracked(&ids[1]).await);

    store.delete_and_persist(1).await.unwrap();

    let refs: Vec<String> = store.references().await.into_iter().map(|r| r.id).collect();
    assert_eq!(refs, vec![ids[0].clone(), ids[2].clone()]);
    assert!(!store.is_tracked(&ids[1]).await);
    assert!(!store.items().path(&ids[1]).exists());

    let on_disk = Encoding::Yaml.read(store.catalog_path()).await.unwrap();
    assert_eq!(on_disk.commands.len(), 2);
}

#[tokio::test]
async fn delete_out_of_range_leaves_catalog_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store_with(dir.path(), &["echo a", "echo b"]).await;
    let before = store.references().await;

    match store.delete_and_persist(2).await {
        Err(CronvaultError::IndexOutOfBounds { index, len }) => {
            assert_eq!((index, len), (2, 2));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(store.references().await, before);
}

#[tokio::test]
async fn load_existing_restores_catalog_and_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let (store, ids) = store_with(dir.path(), &["echo a"]).await;
    store.set_sync(true).await;
    store.save().await.unwrap();
    store.next_running_tasks().await;
    store.save_executions().await.unwrap();

    let reopened = SchedulerStore::load_existing(&path, Encoding::Yaml, false)
        .await
        .unwrap();
    assert!(reopened.is_sync().await);
    assert_eq!(reopened.references().await[0].id, ids[0]);
    assert!(reopened.is_tracked(&ids[0]).await);
    assert_eq!(reopened.planned().await.len(), 1);
}

#[tokio::test]
async fn load_errors_when_files_are_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let err = SchedulerStore::load_existing(&path, Encoding::Json, false)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CronvaultError::NotFound(_)));
    // The catalog folder is created even when loading fails.
    assert!(dir.path().join("nested").is_dir());

    // Catalog present, running-tasks file absent.
    Encoding::Json
        .write(&path, &Default::default())
        .await
        .unwrap();
    let err = SchedulerStore::load_existing(&path, Encoding::Json, false)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CronvaultError::NotFound(_)));
}

#[tokio::test]
async fn create_with_collects_errors_and_keeps_valid_commands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let commands = vec![
        CommandSpec::new(Payload::shell("echo ok")),
        CommandSpec::new(Payload::callback(|_| Ok(()))),
        CommandSpec::repeating(2, Payload::argv(["echo", "twice"]).unwrap()),
    ];
    let (store, errors) = SchedulerStore::create_with(&path, Encoding::Toml, commands, true)
        .await
        .unwrap();

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], CronvaultError::Encode(_)));
    assert_eq!(store.references().await.len(), 2);
    assert!(store.is_sync().await);
    assert!(store.executions_path().exists());
}

#[tokio::test]
async fn load_with_appends_to_existing_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let (store, _) = store_with(dir.path(), &["echo first"]).await;
    store.destroy(true).await.unwrap();

    let (store, errors) = SchedulerStore::load_with(
        &path,
        Encoding::Yaml,
        vec![CommandSpec::new(Payload::shell("echo second"))],
        false,
    )
    .await
    .unwrap();
    assert!(errors.is_empty(), "{errors:?}");
    let labels: Vec<String> = store.references().await.into_iter().map(|r| r.label).collect();
    assert_eq!(labels, ["echo first", "echo second"]);
}

#[tokio::test]
async fn load_with_reports_missing_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let (store, errors) = SchedulerStore::load_with(
        &path,
        Encoding::Json,
        vec![CommandSpec::new(Payload::shell("echo x"))],
        false,
    )
    .await
    .unwrap();
    assert!(matches!(errors.as_slice(), [CronvaultError::NotFound(_)]));
    assert_eq!(store.references().await.len(), 1);
}

#[tokio::test]
async fn destroy_closes_queues_and_releases_locks() {
    let dir = tempfile::tempdir().unwrap();
    let (store, ids) = store_with(dir.path(), &["echo a"]).await;
    let mut errors = store.take_errors().unwrap();
    let mut warnings = store.take_warnings().unwrap();
    store.items().load(&ids[0]).await.unwrap();
    assert_eq!(store.items().lock_count(), 1);

    let path = store.catalog_path().to_path_buf();
    store.destroy(true).await.unwrap();

    assert!(errors.recv().await.is_none());
    assert!(warnings.recv().await.is_none());

    let reopened = SchedulerStore::load_existing(&path, Encoding::Yaml, false)
        .await
        .unwrap();
    assert_eq!(reopened.references().await.len(), 1);
}

#[tokio::test]
async fn destroy_without_saving_leaves_files_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store_with(dir.path(), &["echo a", "echo b"]).await;
    store.next_running_tasks().await;
    assert_eq!(store.running().await.len(), 2);

    let executions = store.executions_path();
    let catalog = store.catalog_path().to_path_buf();
    let executions_before = std::fs::read(&executions).unwrap();
    let catalog_before = std::fs::read(&catalog).unwrap();

    store.destroy(false).await.unwrap();

    assert_eq!(std::fs::read(&executions).unwrap(), executions_before);
    assert_eq!(std::fs::read(&catalog).unwrap(), catalog_before);
}
