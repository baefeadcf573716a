//! Git backend tests on temporary repositories

use std::path::Path;

use cauldron::backend::git::DOCUMENT_FILE;
use cauldron::{
    AppVersionDescriptor, ClientConfig, ConnectOptions, GitStore, StoreBackend,
    StoreConnectionManager, StoreLocation, SUPPORTED_SCHEMA_VERSION,
};
use git2::Repository;
use tempfile::tempdir;

fn local(path: &Path) -> StoreLocation {
    StoreLocation::resolve(path.to_str().unwrap(), Path::new("/unused"))
}

fn head_message(path: &Path) -> String {
    let repo = Repository::open(path).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    head.message().unwrap().to_string()
}

fn commit_count(path: &Path) -> usize {
    let repo = Repository::open(path).unwrap();
    let mut walk = repo.revwalk().unwrap();
    walk.push_head().unwrap();
    walk.count()
}

/// Seed a bare remote from a fresh local store and return its url
fn seed_remote(seed: &Path, bare: &Path) -> String {
    GitStore::open(&local(seed)).unwrap();
    Repository::init_bare(bare).unwrap();
    let seed_repo = Repository::open(seed).unwrap();
    let mut remote = seed_repo.remote("origin", bare.to_str().unwrap()).unwrap();
    remote.push(&["refs/heads/master:refs/heads/master"], None).unwrap();
    bare.to_str().unwrap().to_string()
}

fn remote_location(work: &Path, url: &str) -> StoreLocation {
    StoreLocation {
        path: work.join("store"),
        remote: Some(url.to_string()),
        branch: "master".to_string(),
    }
}

#[test]
fn test_new_local_store_is_initialized() {
    let dir = tempdir().unwrap();
    let store = GitStore::open(&local(dir.path())).unwrap();

    assert_eq!(store.schema_version().unwrap(), SUPPORTED_SCHEMA_VERSION);
    assert!(dir.path().join(DOCUMENT_FILE).exists());
    assert_eq!(head_message(dir.path()), "Initialize Cauldron");

    // Reopening does not create another commit
    drop(store);
    GitStore::open(&local(dir.path())).unwrap();
    assert_eq!(commit_count(dir.path()), 1);
}

#[test]
fn test_discard_restores_working_tree() {
    let dir = tempdir().unwrap();
    let mut store = GitStore::open(&local(dir.path())).unwrap();
    let original = store.read_document().unwrap();

    store.begin_transaction().unwrap();
    let mut doc = original.clone();
    doc.insert_descriptor(&AppVersionDescriptor::parse("app:android:1.0.0")).unwrap();
    store.write_document(&doc, "ignored").unwrap();
    store.write_file("locks/abc", b"lock").unwrap();
    assert_eq!(store.read_document().unwrap(), doc);

    store.discard_transaction().unwrap();
    assert_eq!(store.read_document().unwrap(), original);
    assert_eq!(store.read_file("locks/abc").unwrap(), None);
    assert_eq!(commit_count(dir.path()), 1);
}

#[test]
fn test_commit_creates_single_commit() {
    let dir = tempdir().unwrap();
    let mut store = GitStore::open(&local(dir.path())).unwrap();

    store.begin_transaction().unwrap();
    let mut doc = store.read_document().unwrap();
    doc.insert_descriptor(&AppVersionDescriptor::parse("app:ios:1.0.0")).unwrap();
    store.write_document(&doc, "ignored").unwrap();
    store.write_file("locks/abc", b"lock").unwrap();
    store.commit_transaction("Add app:ios:1.0.0\n- lock file").unwrap();

    assert_eq!(commit_count(dir.path()), 2);
    assert_eq!(head_message(dir.path()), "Add app:ios:1.0.0\n- lock file");
    assert_eq!(store.read_file("locks/abc").unwrap().as_deref(), Some(&b"lock"[..]));
}

#[test]
fn test_file_keys_must_stay_inside_store() {
    let dir = tempdir().unwrap();
    let mut store = GitStore::open(&local(dir.path())).unwrap();
    assert!(store.write_file("../escape", b"x").is_err());
    assert!(store.write_file(DOCUMENT_FILE, b"x").is_err());
}

#[test]
fn test_remote_store_clone_and_push() {
    let seed = tempdir().unwrap();
    let bare = tempdir().unwrap();
    let work = tempdir().unwrap();
    let other = tempdir().unwrap();

    let url = seed_remote(seed.path(), bare.path());
    let location = remote_location(work.path(), &url);
    let mut store = GitStore::open(&location).unwrap();
    let mut doc = store.read_document().unwrap();
    doc.insert_descriptor(&AppVersionDescriptor::parse("app:android:1.0.0")).unwrap();
    store.write_document(&doc, "Add app:android:1.0.0").unwrap();

    let other_store = GitStore::open(&remote_location(other.path(), &url)).unwrap();
    assert_eq!(other_store.read_document().unwrap(), doc);

    // Reopening an existing checkout fetches and resets
    drop(store);
    let reopened = GitStore::open(&location).unwrap();
    assert_eq!(reopened.read_document().unwrap(), doc);
}

#[test]
fn test_failed_push_rolls_back_commit() {
    let seed = tempdir().unwrap();
    let bare = tempdir().unwrap();
    let work = tempdir().unwrap();

    let url = seed_remote(seed.path(), bare.path());
    let location = remote_location(work.path(), &url);
    let mut store = GitStore::open(&location).unwrap();
    let original = store.read_document().unwrap();
    let commits_before = commit_count(&location.path);

    // Pushes fail once the remote is gone
    std::fs::remove_dir_all(bare.path()).unwrap();

    store.begin_transaction().unwrap();
    let mut doc = original.clone();
    doc.insert_descriptor(&AppVersionDescriptor::parse("app:android:1.0.0")).unwrap();
    store.write_document(&doc, "ignored").unwrap();
    store.write_file("locks/abc", b"lock").unwrap();
    assert!(store.commit_transaction("Add app:android:1.0.0").is_err());

    assert_eq!(commit_count(&location.path), commits_before);
    assert_eq!(store.read_document().unwrap(), original);
    assert_eq!(store.read_file("locks/abc").unwrap(), None);

    // The transaction is still open and discarding it is clean
    assert!(store.in_transaction());
    store.discard_transaction().unwrap();
    assert_eq!(store.read_document().unwrap(), original);
    assert_eq!(commit_count(&location.path), commits_before);

    // Direct writes are rolled back the same way
    assert!(store.write_document(&doc, "Add app:android:1.0.0").is_err());
    assert_eq!(store.read_document().unwrap(), original);
    assert_eq!(commit_count(&location.path), commits_before);
}

#[test]
fn test_connection_manager_over_git() {
    let dir = tempdir().unwrap();
    let mut config = ClientConfig::default();
    config.store.active = Some("local".into());
    config
        .store
        .repositories
        .insert("local".into(), dir.path().to_str().unwrap().to_string());

    let mut manager = StoreConnectionManager::new(config).unwrap();
    let helper = manager.active(&ConnectOptions::default()).unwrap();
    let d = AppVersionDescriptor::parse("app:android:1.0.0");

    helper.begin_transaction().unwrap();
    helper.add_descriptor(&d).unwrap();
    helper.update_container_version(&d, "1.0.0").unwrap();
    helper
        .commit_transaction(vec!["Add app".to_string(), "- container 1.0.0".to_string()])
        .unwrap();

    assert_eq!(head_message(dir.path()), "Add app\n- container 1.0.0");
    assert_eq!(helper.top_level_container_version(&d).unwrap().as_deref(), Some("1.0.0"));
    assert_eq!(helper.next_container_version(&d, None).unwrap(), "1.0.1");
}
