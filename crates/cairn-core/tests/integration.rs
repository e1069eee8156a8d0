use std::path::Path;
use std::sync::Arc;

use cairn_core::cas::{self, BlockManager, ObjectId, ObjectManager};
use cairn_core::commands::verify;
use cairn_core::fs::LocalDirectory;
use cairn_core::ignorefs::{self, FilesPolicy, FilesPolicyMap};
use cairn_core::snapshot;
use cairn_core::storage::{self, BlockStore, LocalBackend};
use cairn_core::upload::Uploader;
use cairn_core::vault::{Config, Credentials, MasterKey, Vault};

fn test_credentials() -> Credentials {
    Credentials::Key(MasterKey::from_bytes(&[0x5A; 32]).unwrap())
}

fn local_store(path: &Path) -> Arc<dyn BlockStore> {
    Arc::new(LocalBackend::new(path.to_str().unwrap()).unwrap())
}

fn make_source_tree(root: &Path) {
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::create_dir_all(root.join("build")).unwrap();
    std::fs::write(root.join("readme.txt"), b"hello cairn").unwrap();
    std::fs::write(root.join("docs/guide.md"), b"# guide").unwrap();
    std::fs::write(root.join("build/output.log"), b"noise").unwrap();
    std::fs::write(root.join(".cairnignore"), b"# build artifacts\n*.log\n").unwrap();
}

fn wrap_source(root: &Path) -> Arc<dyn cairn_core::fs::Directory> {
    let mut policies = FilesPolicyMap::new();
    policies.insert(
        ".".to_string(),
        FilesPolicy {
            dot_ignore_files: vec![".cairnignore".to_string()],
            ..FilesPolicy::default()
        },
    );
    ignorefs::wrap(
        Arc::new(LocalDirectory::new(root)),
        Arc::new(policies),
        vec![],
    )
}

#[test]
fn vault_create_reopen_from_exported_config() {
    let tmp = tempfile::tempdir().unwrap();
    let vault_dir = tmp.path().join("vault");

    let vault = Vault::create(
        local_store(&vault_dir),
        &cairn_core::vault::Format::default(),
        &test_credentials(),
        None,
        &cas::Format::default(),
    )
    .unwrap();
    vault.put("snapshot-latest", b"Dcafebabe").unwrap();

    // Round-trip the exported config through JSON, as the CLI would.
    let config_json = serde_json::to_string(&vault.config().unwrap()).unwrap();
    vault.close().unwrap();

    let config: Config = serde_json::from_str(&config_json).unwrap();
    let creds = Credentials::Key(MasterKey::from_bytes(&config.key).unwrap());
    let reopened = Vault::open(storage::connect(&config.connection).unwrap(), &creds).unwrap();

    assert_eq!(reopened.item_prefix(), "VLT");
    assert_eq!(reopened.get("snapshot-latest").unwrap(), b"Dcafebabe");
    assert_eq!(reopened.list("").unwrap(), vec!["snapshot-latest".to_string()]);
}

#[test]
fn backup_filters_ignored_files_and_dedupes() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let repo = tmp.path().join("repo");
    make_source_tree(&source);

    let store = local_store(&repo);
    let manager: Arc<dyn ObjectManager> = Arc::new(BlockManager::new(Arc::clone(&store)));
    let uploader = Uploader::new(Arc::clone(&manager));

    let root_id = uploader
        .upload_dir(wrap_source(&source).as_ref(), ".", &ObjectId::NULL)
        .unwrap();

    let listing = snapshot::read_listing(manager.open(&root_id).unwrap()).unwrap();
    let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".cairnignore", "build", "docs", "readme.txt"]);

    let build = listing.find_entry("build").unwrap();
    let build_listing = snapshot::read_listing(manager.open(&build.object_id).unwrap()).unwrap();
    assert!(
        build_listing.entries.is_empty(),
        "*.log content must be ignored"
    );

    // A second upload of the unchanged tree returns the identical root and
    // stores nothing new.
    let keys_before = store.list("").unwrap().len();
    let again = uploader
        .upload_dir(wrap_source(&source).as_ref(), ".", &root_id)
        .unwrap();
    assert_eq!(again, root_id);
    assert_eq!(store.list("").unwrap().len(), keys_before);
}

#[test]
fn modified_file_changes_root_and_verifies() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let repo = tmp.path().join("repo");
    make_source_tree(&source);

    let store = local_store(&repo);
    let manager: Arc<dyn ObjectManager> = Arc::new(BlockManager::new(Arc::clone(&store)));
    let uploader = Uploader::new(Arc::clone(&manager));

    let first = uploader
        .upload_dir(wrap_source(&source).as_ref(), ".", &ObjectId::NULL)
        .unwrap();

    std::fs::write(source.join("docs/guide.md"), b"# guide, revised").unwrap();

    let second = uploader
        .upload_dir(wrap_source(&source).as_ref(), ".", &first)
        .unwrap();
    assert_ne!(second, first);

    for root in [&first, &second] {
        let result = verify::run(
            manager.as_ref(),
            root,
            &verify::VerifyOptions {
                recursive: true,
                max_errors: 10,
            },
        )
        .unwrap();
        assert!(
            result.errors.is_empty(),
            "verification failed: {:?}",
            result.errors
        );
    }
}

#[test]
fn verify_detects_deleted_block() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let repo = tmp.path().join("repo");
    make_source_tree(&source);

    let store = local_store(&repo);
    let manager: Arc<dyn ObjectManager> = Arc::new(BlockManager::new(Arc::clone(&store)));
    let uploader = Uploader::new(Arc::clone(&manager));

    let root_id = uploader
        .upload_dir(wrap_source(&source).as_ref(), ".", &ObjectId::NULL)
        .unwrap();

    // Delete one file object out from under the tree.
    let listing = snapshot::read_listing(manager.open(&root_id).unwrap()).unwrap();
    let victim = listing.find_entry("readme.txt").unwrap().object_id.clone();
    store.delete(victim.as_str()).unwrap();

    let result = verify::run(
        manager.as_ref(),
        &root_id,
        &verify::VerifyOptions {
            recursive: true,
            max_errors: 10,
        },
    )
    .unwrap();
    assert!(!result.errors.is_empty());
    assert!(result.errors.iter().any(|e| e.path.contains("readme.txt")));
}

#[test]
fn dedicated_vault_references_repository_store() {
    let tmp = tempfile::tempdir().unwrap();
    let vault_dir = tmp.path().join("vault");
    let repo_dir = tmp.path().join("repo");

    let vault = Vault::create(
        local_store(&vault_dir),
        &cairn_core::vault::Format::default(),
        &test_credentials(),
        Some(local_store(&repo_dir)),
        &cas::Format::default(),
    )
    .unwrap();
    assert_eq!(vault.item_prefix(), "");

    let connection = vault.repo_config.connection.clone().unwrap();
    assert_eq!(connection.kind, "file");
    vault.repo_config.format.validate().unwrap();
    vault.close().unwrap();

    // Reopen and reconnect the repository store from the embedded info.
    let reopened = Vault::open(local_store(&vault_dir), &test_credentials()).unwrap();
    let repo_store = storage::connect(reopened.repo_config.connection.as_ref().unwrap()).unwrap();
    repo_store.put("probe", b"x", true).unwrap();
    assert!(repo_dir.join("probe").exists());
}
