use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use predicates::str::contains;

struct Fixture {
    _dir: tempfile::TempDir,
    policy: PathBuf,
    users: PathBuf,
    audit_log: PathBuf,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let policy = root.join("policy.json");
        let users = root.join("users.json");
        let audit_log = root.join("actions.log");

        fs::write(
            &policy,
            r#"{
                "admin": ["read_file", "write_file", "list_processes", "spawn_process", "ping_host"],
                "auditor": []
            }"#,
        )
        .expect("write policy fixture");
        fs::write(
            &users,
            r#"{
                "alice": {"password": "s3cret", "role": "admin"},
                "bob": {"password": "pw", "role": "auditor"}
            }"#,
        )
        .expect("write users fixture");

        Self {
            _dir: dir,
            policy,
            users,
            audit_log,
            root,
        }
    }

    fn cmd(&self, args: &[&str]) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("opsgate-cli");
        cmd.arg("--policy")
            .arg(&self.policy)
            .arg("--users")
            .arg(&self.users)
            .arg("--audit-log")
            .arg(&self.audit_log)
            .args(args)
            .timeout(Duration::from_secs(10));
        cmd
    }

    fn path_arg(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }
}

fn login(username: &str, password: &str) -> Vec<String> {
    vec![
        "--username".to_string(),
        username.to_string(),
        "--password".to_string(),
        password.to_string(),
    ]
}

#[test]
fn bad_credentials_exit_nonzero_with_uniform_message() {
    let fixture = Fixture::new();

    let mut unknown_user = fixture.cmd(&["system-info"]);
    unknown_user.args(login("nobody", "whatever"));
    unknown_user
        .assert()
        .failure()
        .stderr(contains("invalid username or password"));

    let mut wrong_password = fixture.cmd(&["system-info"]);
    wrong_password.args(login("alice", "wrong"));
    wrong_password
        .assert()
        .failure()
        .stderr(contains("invalid username or password"));
}

#[test]
fn write_then_read_round_trips() {
    let fixture = Fixture::new();
    let target = fixture.path_arg("note.txt");

    let mut write = fixture.cmd(&["write-file", &target, "hello"]);
    write.args(login("alice", "s3cret"));
    write
        .assert()
        .success()
        .stdout(contains("File written successfully."));

    let mut read = fixture.cmd(&["read-file", &target]);
    read.args(login("alice", "s3cret"));
    read.assert().success().stdout(contains("hello"));
}

#[test]
fn read_missing_file_reports_fixed_message() {
    let fixture = Fixture::new();

    let mut read = fixture.cmd(&["read-file", "/nonexistent/path"]);
    read.args(login("alice", "s3cret"));
    read.assert()
        .failure()
        .stderr(contains("File does not exist."));
}

#[test]
fn ungranted_permission_is_denied() {
    let fixture = Fixture::new();
    let target = fixture.path_arg("blocked.txt");

    let mut write = fixture.cmd(&["write-file", &target, "never"]);
    write.args(login("bob", "pw"));
    write
        .assert()
        .failure()
        .stderr(contains("Permission denied."));
    assert!(
        !Path::new(&target).exists(),
        "denied write must not touch the target"
    );
}

#[test]
fn system_info_is_available_to_permissionless_role() {
    let fixture = Fixture::new();

    let mut info = fixture.cmd(&["system-info"]);
    info.args(login("bob", "pw"));
    info.assert()
        .success()
        .stdout(contains("OS:"))
        .stdout(contains("CPU Cores:"));
}

#[test]
fn logs_list_recorded_attempts_newest_first() {
    let fixture = Fixture::new();
    let target = fixture.path_arg("note.txt");

    let mut write = fixture.cmd(&["write-file", &target, "hello"]);
    write.args(login("alice", "s3cret"));
    write.assert().success();

    let mut denied = fixture.cmd(&["write-file", &target, "no"]);
    denied.args(login("bob", "pw"));
    denied.assert().failure();

    let mut logs = fixture.cmd(&["logs", "--username", "bob"]);
    logs.assert()
        .success()
        .stdout(contains("bob\twrite_file\tfailed"))
        .stdout(contains("bob\tlogin\tsuccess"));
}

#[test]
fn logs_export_writes_csv_with_header() {
    let fixture = Fixture::new();
    let target = fixture.path_arg("note.txt");

    let mut write = fixture.cmd(&["write-file", &target, "hello"]);
    write.args(login("alice", "s3cret"));
    write.assert().success();

    let csv_path = fixture.path_arg("export.csv");
    let mut export = fixture.cmd(&["logs", "--export", &csv_path]);
    export.assert().success().stdout(contains("exported"));

    let contents = fs::read_to_string(&csv_path).expect("read export");
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("username,action,status,timestamp"));
    assert!(contents.contains("alice,write_file,success,"));
    assert!(contents.contains("alice,login,success,"));
}

#[test]
fn failed_login_is_audited() {
    let fixture = Fixture::new();

    let mut attempt = fixture.cmd(&["list-processes"]);
    attempt.args(login("alice", "wrong"));
    attempt.assert().failure();

    let mut logs = fixture.cmd(&["logs", "--status", "failed"]);
    logs.assert()
        .success()
        .stdout(contains("alice\tlogin\tfailed"));
}
