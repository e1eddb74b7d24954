// file: tests/integration_test.rs
// version: 2.0.0
// guid: z6a7b8c9-d0e1-2345-6789-012345zabcde

//! Integration tests for the first-boot provisioner

use assert_cmd::Command;
use firstboot_provisioner::{
    config::ProvisionSettings,
    installer::{Provisioner, RunOptions, RunOutcome, RunStatus},
    steps::collector::ScriptedPrompter,
    steps::marker::{read_marker, MarkerState},
    steps::preflight::ByteSize,
    steps::storage::StorageManager,
    steps::ProvisionStage,
    system::utils::NicIdentity,
    system::RecordingExecutor,
    ProvisionError,
};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const LSBLK_94G: &str = r#"{"blockdevices":[{"name":"sda","path":"/dev/sda","size":100931731456,"type":"disk","model":"QEMU"},{"name":"sr0","path":"/dev/sr0","size":1073741824,"type":"rom"}]}"#;
const LSBLK_50G: &str = r#"{"blockdevices":[{"name":"vda","path":"/dev/vda","size":53687091200,"type":"disk"}]}"#;
const PSK: &str = "0123456789abcdef0123456789abcdef";

fn staged_settings(root: &Path) -> ProvisionSettings {
    let mut settings = ProvisionSettings::default().staged_under(root);
    settings.packages.retry.delay_secs = 0;
    settings
}

fn operator_answers() -> Vec<&'static str> {
    vec![
        "203.0.113.10",
        "proxy-01",
        "10.0.0.5",
        "abc",
        "abc",
        PSK,
        PSK,
        "",
        "agent",
        "db-password-1",
        "db-password-1",
        "yes",
    ]
}

fn appliance_executor(lsblk: &str) -> RecordingExecutor {
    RecordingExecutor::new()
        .respond("lsblk", lsblk)
        .fail("mountpoint", "not a mountpoint")
}

fn nic() -> NicIdentity {
    NicIdentity {
        name: "eth0".to_string(),
        mac: "52:54:00:12:34:56".to_string(),
    }
}

#[tokio::test]
async fn test_full_run_on_minimum_disk() {
    // Arrange
    let tmp = TempDir::new().unwrap();
    let mut settings = staged_settings(tmp.path());
    settings.self_remove = true;
    let binary = tmp.path().join("firstboot-provision");
    std::fs::write(&binary, b"binary").unwrap();

    let marker_path = settings.paths.marker.clone();
    let psk_path = settings.paths.psk_file.clone();
    let log_account = settings.hardening.log_account.clone();

    let mut exec = appliance_executor(LSBLK_94G);
    let mut prompter = ScriptedPrompter::new(operator_answers());
    let provisioner = Provisioner::new(settings, RunOptions::default())
        .with_self_path(&binary)
        .with_interfaces(vec![nic()]);

    // Act
    let outcome = provisioner.run(&mut exec, &mut prompter).await.unwrap();

    // Assert
    let RunOutcome::Completed {
        target,
        marker,
        report,
        ..
    } = outcome
    else {
        panic!("expected a completed run");
    };

    assert_eq!(target.device, Path::new("/dev/sda"));
    assert_eq!(target.data_partition_size(), ByteSize::from_gib(90));

    // Short key rejected once, then accepted
    let rejections = prompter
        .notices
        .iter()
        .filter(|n| n.starts_with("Invalid input"))
        .count();
    assert_eq!(rejections, 1);
    assert_eq!(std::fs::read_to_string(&psk_path).unwrap(), format!("{}\n", PSK));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&psk_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
    let psk_files = std::fs::read_dir(psk_path.parent().unwrap())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path() == psk_path)
        .count();
    assert_eq!(psk_files, 1);

    // Firewall completes before the privileged lockout
    let reload = exec.position_of("firewall-cmd --reload").unwrap();
    let lock = exec.position_of("passwd -l").unwrap();
    assert!(reload < lock);
    assert_eq!(exec.count_of("passwd -l"), 1);

    // Secrets only travel on stdin
    let chpasswd = exec
        .commands()
        .iter()
        .find(|c| c.command.starts_with("chpasswd"))
        .unwrap();
    let stdin = chpasswd.stdin.as_deref().unwrap();
    assert!(stdin.starts_with(&format!("{}:", log_account)));
    assert!(exec
        .commands()
        .iter()
        .all(|c| !c.command.contains(&report.password) && !c.command.contains("db-password-1")));

    assert_eq!(report.host_identity, "proxy-01");
    assert_eq!(report.interfaces, vec![nic()]);
    assert_eq!(marker.host_identity, "proxy-01");
    assert!(matches!(read_marker(&marker_path).await, MarkerState::Present(_)));
    assert!(!binary.exists());

    let state = provisioner.state_handle();
    let state = state.read().await;
    assert_eq!(state.stage, ProvisionStage::SelfRemoved);
    assert_eq!(state.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_undersized_disk_aborts_before_any_change() {
    let tmp = TempDir::new().unwrap();
    let mut exec = appliance_executor(LSBLK_50G);
    let mut prompter = ScriptedPrompter::new(operator_answers());
    let provisioner = Provisioner::new(staged_settings(tmp.path()), RunOptions::default());

    let err = provisioner.run(&mut exec, &mut prompter).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Disk(_)));
    assert_eq!(err.exit_code(), 1);
    let message = err.to_string();
    assert!(message.contains("94 GiB"), "{}", message);
    assert!(message.contains("50 GiB"), "{}", message);
    assert!(exec.mutating_commands().is_empty());
    assert!(prompter.prompts.is_empty());
}

#[tokio::test]
async fn test_package_failure_never_reaches_hardening() {
    let tmp = TempDir::new().unwrap();
    let mut exec = appliance_executor(LSBLK_94G).fail("dnf install", "no mirrors reachable");
    let mut prompter = ScriptedPrompter::new(operator_answers());
    let settings = staged_settings(tmp.path());
    let attempts = settings.packages.retry.max_attempts as usize;
    let provisioner = Provisioner::new(settings, RunOptions::default());

    let err = provisioner.run(&mut exec, &mut prompter).await.unwrap_err();

    assert!(!matches!(err, ProvisionError::PostHardening(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(exec.count_of("dnf install"), attempts);
    assert_eq!(exec.count_of("firewall-cmd"), 0);
    assert_eq!(exec.count_of("passwd -l"), 0);

    let state = provisioner.state_handle();
    assert_eq!(
        state.read().await.stage,
        ProvisionStage::ParametersCollected
    );
}

#[tokio::test]
async fn test_lockout_failure_requires_manual_recovery() {
    let tmp = TempDir::new().unwrap();
    let settings = staged_settings(tmp.path());
    let marker_path = settings.paths.marker.clone();
    let mut exec = appliance_executor(LSBLK_94G).fail("passwd -l", "authentication token lock busy");
    let mut prompter = ScriptedPrompter::new(operator_answers());
    let provisioner = Provisioner::new(settings, RunOptions::default());

    let err = provisioner.run(&mut exec, &mut prompter).await.unwrap_err();

    assert!(matches!(err, ProvisionError::PostHardening(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(exec.count_of("passwd -l"), 1);
    assert!(matches!(read_marker(&marker_path).await, MarkerState::Absent));

    let state = provisioner.state_handle();
    let state = state.read().await;
    assert_eq!(state.stage, ProvisionStage::PackagesConfigured);
    assert_eq!(state.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_second_run_after_completion_is_a_no_op() {
    let tmp = TempDir::new().unwrap();

    let mut exec = appliance_executor(LSBLK_94G);
    let mut prompter = ScriptedPrompter::new(operator_answers());
    Provisioner::new(staged_settings(tmp.path()), RunOptions::default())
        .with_interfaces(vec![nic()])
        .run(&mut exec, &mut prompter)
        .await
        .unwrap();

    let mut exec = appliance_executor(LSBLK_94G);
    let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
    let outcome = Provisioner::new(staged_settings(tmp.path()), RunOptions::default())
        .run(&mut exec, &mut prompter)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        RunOutcome::AlreadyProvisioned(MarkerState::Present(_))
    ));
    assert!(exec.commands().is_empty());
    assert!(prompter.prompts.is_empty());
}

#[tokio::test]
async fn test_bind_registration_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let settings = staged_settings(tmp.path());
    std::fs::create_dir_all(&settings.paths.log_dir).unwrap();
    std::fs::write(settings.paths.log_dir.join("boot.log"), "first boot\n").unwrap();

    for _ in 0..2 {
        let mut exec = RecordingExecutor::new().fail("mountpoint", "not a mountpoint");
        StorageManager::new(&mut exec, &settings.paths)
            .prepare()
            .await
            .unwrap();
    }

    let fstab = std::fs::read_to_string(&settings.paths.fstab).unwrap();
    let binds = fstab.lines().filter(|l| l.contains(" bind ")).count();
    assert_eq!(binds, 1);
    assert_eq!(
        std::fs::read_to_string(settings.paths.data_dir.join("boot.log")).unwrap(),
        "first boot\n"
    );
}

#[test]
fn test_cli_help_lists_commands() {
    Command::cargo_bin("firstboot-provision")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("generate-psk"));
}

#[test]
fn test_cli_generate_psk() {
    Command::cargo_bin("firstboot-provision")
        .unwrap()
        .args(["--quiet", "generate-psk"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?m)^[0-9a-f]{32}$").unwrap());
}

#[test]
fn test_cli_render_config() {
    let tmp = TempDir::new().unwrap();
    let template = tmp.path().join("agent.conf");
    let params = tmp.path().join("params.yaml");
    std::fs::write(&template, "# agent\nServer=127.0.0.1\nLogFileSize=0\n").unwrap();
    std::fs::write(
        &params,
        format!(
            "time_server: ntp.example.net\nhost_identity: proxy-01\nserver_address: 10.0.0.5\npsk: {}\ndatabase:\n  user: agent\n  password: db-password-1\n",
            PSK
        ),
    )
    .unwrap();

    Command::cargo_bin("firstboot-provision")
        .unwrap()
        .env_remove("FIRSTBOOT_CONFIG")
        .args(["--quiet", "render-config", "--template"])
        .arg(&template)
        .arg("--params")
        .arg(&params)
        .assert()
        .success()
        .stdout(predicate::str::contains("Server=10.0.0.5"))
        .stdout(predicate::str::contains("Hostname=proxy-01"))
        .stdout(predicate::str::contains("LogFileSize=0"))
        .stdout(predicate::str::contains("Server=127.0.0.1").not());
}

#[test]
fn test_cli_status_reads_marker() {
    let tmp = TempDir::new().unwrap();
    let marker = tmp.path().join("provisioned.json");

    Command::cargo_bin("firstboot-provision")
        .unwrap()
        .args(["--quiet", "status", "--marker"])
        .arg(&marker)
        .assert()
        .success()
        .stdout(predicate::str::contains("Not provisioned"));

    std::fs::write(&marker, "not json").unwrap();

    Command::cargo_bin("firstboot-provision")
        .unwrap()
        .args(["--quiet", "status", "--marker"])
        .arg(&marker)
        .assert()
        .success()
        .stdout(predicate::str::contains("Provisioned"));
}
