use std::process::Command;
use std::{env, fs, path::PathBuf};

use tempfile::tempdir;

fn cli_bin_path() -> PathBuf {
    if let Ok(path) = env::var("CARGO_BIN_EXE_lorekeeper-cli") {
        return PathBuf::from(path);
    }
    if let Ok(path) = env::var("CARGO_BIN_EXE_lorekeeper_cli") {
        return PathBuf::from(path);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .map(PathBuf::from)
        .expect("workspace root");
    let bin_name = if cfg!(windows) {
        "lorekeeper-cli.exe"
    } else {
        "lorekeeper-cli"
    };
    let fallback = workspace_root.join("target").join("debug").join(bin_name);
    assert!(
        fallback.exists(),
        "lorekeeper-cli binary not found at {}",
        fallback.display()
    );
    fallback
}

#[test]
fn status_process_contract_returns_success_with_json_payload() {
    // Pseudocode:
    // Given a fresh root
    // When running `lorekeeper-cli status`
    // Then process exits with success and emits the vault status payload.
    let root = tempdir().expect("tempdir");
    let output = Command::new(cli_bin_path())
        .args(["--root", root.path().to_str().expect("root path"), "status"])
        .output()
        .expect("run status");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"documents\""));
    assert!(stdout.contains("\"registry\""));
}

#[test]
fn search_process_contract_emits_selection_and_diagnostics() {
    // Pseudocode:
    // Given a root holding one markdown document
    // When running `lorekeeper-cli search oolong`
    // Then process exits with success and the payload carries the winners
    // plus the match diagnostics.
    let root = tempdir().expect("tempdir");
    fs::write(root.path().join("notes.md"), "# Tea\noolong steeping notes").expect("write");
    let output = Command::new(cli_bin_path())
        .args([
            "--root",
            root.path().to_str().expect("root path"),
            "search",
            "oolong",
        ])
        .output()
        .expect("run search");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"selected\""));
    assert!(stdout.contains("notes.md"));
    assert!(stdout.contains("\"outcome\""));
}

#[test]
fn sync_process_contract_fails_without_a_configured_remote() {
    // Pseudocode:
    // Given a fresh root and no remote configuration
    // When running `lorekeeper-cli sync`
    // Then process exits non-zero and names the missing configuration.
    let root = tempdir().expect("tempdir");
    let output = Command::new(cli_bin_path())
        .env_remove("LOREKEEPER_REMOTE_URL")
        .args(["--root", root.path().to_str().expect("root path"), "sync"])
        .output()
        .expect("run sync");

    assert!(
        !output.status.success(),
        "stdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("remote mirror is not configured"));
}
