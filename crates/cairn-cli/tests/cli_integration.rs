use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

struct CliFixture {
    _tmp: TempDir,
    config_path: PathBuf,
    vault_dir: PathBuf,
    source_dir: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("cairn.json");
        let vault_dir = tmp.path().join("vault");
        let source_dir = tmp.path().join("source");
        std::fs::create_dir_all(&source_dir).unwrap();

        Self {
            _tmp: tmp,
            config_path,
            vault_dir,
            source_dir,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cairn"));
        cmd.arg("--config");
        cmd.arg(&self.config_path);
        cmd.args(args);
        cmd.env("CAIRN_PASSPHRASE", "test-passphrase");
        cmd.output().unwrap()
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "command failed: {args:?}\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    fn init_colocated(&self) {
        let vault = self.vault_dir.to_string_lossy().to_string();
        self.run_ok(&["init", "--vault", &vault]);
    }

    fn populate_source(&self) {
        std::fs::create_dir_all(self.source_dir.join("sub")).unwrap();
        std::fs::write(self.source_dir.join("hello.txt"), b"hello").unwrap();
        std::fs::write(self.source_dir.join("sub/data.bin"), b"payload").unwrap();
        std::fs::write(self.source_dir.join("scratch.tmp"), b"scratch").unwrap();
        std::fs::write(self.source_dir.join(".cairnignore"), b"*.tmp\n").unwrap();
    }
}

#[test]
fn init_backup_verify_lifecycle() {
    let fixture = CliFixture::new();
    fixture.init_colocated();
    fixture.populate_source();

    let source = fixture.source_dir.to_string_lossy().to_string();
    let stdout = fixture.run_ok(&["backup", &source]);
    assert!(stdout.contains("Snapshot root: D"));

    let stdout = fixture.run_ok(&["verify", "latest", "--recursive"]);
    assert!(stdout.contains("no errors"));

    // Unchanged tree: the same root comes back.
    let stdout = fixture.run_ok(&["backup", &source]);
    assert!(stdout.contains("No changes since previous snapshot"));
}

#[test]
fn verify_fails_after_block_deletion() {
    let fixture = CliFixture::new();
    fixture.init_colocated();
    fixture.populate_source();

    let source = fixture.source_dir.to_string_lossy().to_string();
    fixture.run_ok(&["backup", &source]);

    // Remove one file object from the colocated store.
    let victim = std::fs::read_dir(&fixture.vault_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().starts_with('F'))
        .expect("store must contain file objects");
    std::fs::remove_file(victim.path()).unwrap();

    let output = fixture.run(&["verify", "latest", "--recursive", "--max-errors", "10"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "stderr was: {stderr}");
}

#[test]
fn item_roundtrip() {
    let fixture = CliFixture::new();
    fixture.init_colocated();

    let payload_path = fixture.source_dir.join("payload.bin");
    std::fs::write(&payload_path, b"item payload").unwrap();
    let payload = payload_path.to_string_lossy().to_string();

    fixture.run_ok(&["item", "put", "alpha", &payload]);
    let stdout = fixture.run_ok(&["item", "get", "alpha"]);
    assert_eq!(stdout, "item payload");

    let stdout = fixture.run_ok(&["item", "list"]);
    assert!(stdout.contains("alpha"));

    fixture.run_ok(&["item", "remove", "alpha"]);
    let output = fixture.run(&["item", "get", "alpha"]);
    assert!(!output.status.success());
}

#[test]
fn reserved_item_names_are_rejected() {
    let fixture = CliFixture::new();
    fixture.init_colocated();

    let payload_path = fixture.source_dir.join("x");
    std::fs::write(&payload_path, b"x").unwrap();
    let payload = payload_path.to_string_lossy().to_string();

    for name in ["format", "repo"] {
        let output = fixture.run(&["item", "put", name, &payload]);
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("invalid vault item name"));
    }
}

#[test]
fn ignored_files_stay_out_of_snapshots() {
    let fixture = CliFixture::new();
    fixture.init_colocated();
    fixture.populate_source();

    let source = fixture.source_dir.to_string_lossy().to_string();
    fixture.run_ok(&["backup", &source]);

    // scratch.tmp is excluded by .cairnignore. Repository objects are
    // stored as plaintext blocks, so its bytes must not appear anywhere.
    let mut found = false;
    for entry in std::fs::read_dir(&fixture.vault_dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_type().unwrap().is_file() {
            let data = std::fs::read(entry.path()).unwrap();
            if data.windows(7).any(|w| w == b"scratch") {
                found = true;
            }
        }
    }
    assert!(!found, "ignored file content leaked into the store");
}
