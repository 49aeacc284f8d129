use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const RULES: &str = r#"{
  "com.example.app": {
    "MainActivity": [
      {"viewClass": "android.widget.Button", "depth": [0, 2], "visibility": 8, "alias": "ad"}
    ]
  },
  "com.other.app": {
    "Screen1": [{"viewClass": "android.widget.TextView", "depth": [1]}]
  }
}"#;

fn init(dir: &TempDir) {
    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn import(dir: &TempDir) {
    let file = dir.path().join("export.json");
    std::fs::write(&file, RULES).unwrap();
    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("import")
        .arg(&file)
        .assert()
        .success();
}

#[test]
fn test_cli_help() {
    let mut cmd = cargo_bin_cmd!("godmode");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Per-app view hiding rules and edit mode",
        ))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("edit-mode"))
        .stdout(predicate::str::contains("icon"));
}

#[test]
fn test_cli_version() {
    let mut cmd = cargo_bin_cmd!("godmode");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("godmode"));
}

#[test]
fn test_cli_config_help() {
    let mut cmd = cargo_bin_cmd!("godmode");
    cmd.args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("reset"));
}

#[test]
fn test_list_requires_init() {
    let dir = TempDir::new().unwrap();
    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path().join("missing"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("godmode init"));
}

#[test]
fn test_init_writes_config() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    assert!(dir.path().join("config.toml").exists());
    assert!(dir.path().join("prefs.toml").exists());
}

#[test]
fn test_import_then_list_json() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    import(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--output", "json", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""package_name":"com.example.app""#))
        .stdout(predicate::str::contains(r#""package_name":"com.other.app""#));

    assert!(dir.path().join("app_rules.json").exists());
}

#[test]
fn test_show_unknown_app_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["show", "com.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No rules recorded for app: com.nope"));
}

#[test]
fn test_import_malformed_file_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let file = dir.path().join("bad.json");
    std::fs::write(&file, "[1, 2, 3]").unwrap();

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("import")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Import file is malformed"));
}

#[test]
fn test_remove_rule() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    import(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["remove", "com.example.app", "--activity", "MainActivity", "--index", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed rule alias:ad"));

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["remove", "com.example.app", "--activity", "MainActivity", "--index", "0"])
        .assert()
        .failure();
}

#[test]
fn test_reset_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("reset")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_list_warns_when_agent_is_missing() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Enforcement module is not active"));
}

#[test]
fn test_list_reports_upgrade_once() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    std::fs::write(
        dir.path().join("prefs.toml"),
        "last_seen_version = \"0.0.1\"\n",
    )
    .unwrap();

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgraded from 0.0.1"));

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgraded from").not());
}

#[test]
fn test_internal_failure_notes_rules_untouched() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("config.toml"), "[store\n").unwrap();

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Stored rules were not changed"));
}

#[test]
fn test_user_error_is_reported_verbatim() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["show", "com.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Stored rules were not changed").not());
}

#[test]
fn test_edit_mode_without_agent_is_reported() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["edit-mode", "on"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Enforcement module is not active"));
}

#[test]
fn test_edit_mode_with_attached_agent() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("shared/agent.attached"), "").unwrap();

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["edit-mode", "on"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Edit mode turned on"));

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--output", "json", "edit-mode", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""available":true"#))
        .stdout(predicate::str::contains(r#""editing":true"#));
}

#[test]
fn test_icon_toggle() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["icon", "hide"])
        .assert()
        .success()
        .stdout(predicate::str::contains("now hidden"));

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--output", "json", "icon"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""icon_hidden":true"#));
}

#[test]
fn test_config_show() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    cargo_bin_cmd!("godmode")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("app_rules.json"));
}
