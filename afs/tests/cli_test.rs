use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use artifactstore::{ArtifactKind, ArtifactStore};

fn afs(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("afs").unwrap();
    cmd.arg("--root").arg(root.path());
    cmd
}

#[test]
fn test_sessions_marks_latest() {
    let temp = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp.path()).unwrap();
    store.register_session("sess-old").unwrap();
    store.register_session("sess-new").unwrap();

    afs(&temp)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("sess-new"))
        .stdout(predicate::str::contains("(latest)"))
        .stdout(predicate::str::contains("sess-old"));
}

#[test]
fn test_ls_defaults_to_latest() {
    let temp = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp.path()).unwrap();
    store.register_session("sess-x").unwrap();
    store.save("sess-x", "# draft", ArtifactKind::Markdown, "").unwrap();

    afs(&temp)
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("sess-x 1 artifact(s)"))
        .stdout(predicate::str::contains(".md"));
}

#[test]
fn test_cat_truncates() {
    let temp = TempDir::new().unwrap();
    let store = ArtifactStore::open(temp.path()).unwrap();
    let r = store.save("sess-x", "abcdefghij", ArtifactKind::Text, "").unwrap();
    let file = r.path.rsplit('/').next().unwrap().to_string();

    afs(&temp)
        .args(["cat", "sess-x", &file, "--max", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("abcd..."));
}

#[test]
fn test_ls_without_sessions_fails() {
    let temp = TempDir::new().unwrap();
    afs(&temp).arg("ls").assert().failure();
}
