//! Integration tests for the CLI interface
//!
//! Runs the `groupsum` binary end to end

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SCENARIO: &str = "a,b,c,m1,m2\nx,y,z,1,2\nx,y,z,3,4\np,q,r,5,5\n";

fn groupsum(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("groupsum").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env_remove("GROUPSUM_WORK_DIR")
        .env_remove("GROUPSUM_CHUNK_SIZE")
        .env_remove("GROUPSUM_MAX_PARALLEL");
    cmd
}

#[test]
fn test_cli_help_flag() {
    let dir = TempDir::new().unwrap();
    groupsum(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_run_writes_output_and_report() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.csv"), SCENARIO).unwrap();

    groupsum(&dir)
        .args([
            "run",
            "data.csv",
            "--chunk-size",
            "1",
            "--output",
            "sums.csv",
            "--report",
            "report.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 rows -> 2 groups"));

    let output = std::fs::read_to_string(dir.path().join("sums.csv")).unwrap();
    assert!(output.starts_with("a,b,c,m1,m2\n"));
    assert!(output.contains("x,y,z,4,6\n"));
    assert!(output.contains("p,q,r,5,5\n"));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["split"]["chunks"], 3);
    assert_eq!(report["reduce"]["groups_out"], 2);
    assert_eq!(report["resumed"], false);
}

#[test]
fn test_stale_workspace_exits_with_code_two() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.csv"), SCENARIO).unwrap();
    std::fs::create_dir_all(dir.path().join("groupsum-work")).unwrap();
    std::fs::write(dir.path().join("groupsum-work/input1.csv"), "a,b,c\n").unwrap();

    groupsum(&dir)
        .args(["run", "data.csv"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("previous run"));

    groupsum(&dir)
        .args(["run", "data.csv", "--force"])
        .assert()
        .success();
}

#[test]
fn test_malformed_input_exits_with_code_three() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.csv"), "a,b,c,m\nx,y,z,oops\n").unwrap();

    groupsum(&dir)
        .args(["run", "data.csv"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not a 64-bit integer"));
}

#[test]
fn test_resume_without_checkpoint_runs_fresh() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.csv"), SCENARIO).unwrap();

    groupsum(&dir)
        .args(["resume", "data.csv", "--chunk-size", "8"])
        .assert()
        .success();
    assert!(dir.path().join("output.csv").exists());
}

#[test]
fn test_clean_removes_intermediates() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("scratch");
    std::fs::create_dir_all(&work).unwrap();
    std::fs::write(work.join("sorted2.csv"), "a,b,c\n").unwrap();
    std::fs::write(work.join("meta.json"), "{}").unwrap();

    groupsum(&dir)
        .args(["clean", "--work-dir", "scratch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 files"));
    assert!(!work.join("sorted2.csv").exists());
    assert!(!work.join("meta.json").exists());
}

#[test]
fn test_config_file_is_picked_up() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.csv"), SCENARIO).unwrap();
    std::fs::write(
        dir.path().join("groupsum.toml"),
        "output_file = \"from-config.csv\"\nchunk_size_bytes = 4\n",
    )
    .unwrap();

    groupsum(&dir).args(["run", "data.csv"]).assert().success();
    assert!(dir.path().join("from-config.csv").exists());
}

#[test]
fn test_invalid_config_exits_with_code_two() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.csv"), SCENARIO).unwrap();

    groupsum(&dir)
        .args(["run", "data.csv", "--max-parallel", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_parallel"));
}
