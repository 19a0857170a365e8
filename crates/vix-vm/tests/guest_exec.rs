//! Integration tests for vix-vm against the in-process simulator.
//!
//! The `vix_library` tests at the bottom need a real VMware host.
//!
//! Run with: `cargo test -p vix-vm --features vix-ffi -- --ignored`

use std::sync::Arc;
use std::time::Duration;
use vix_core::sim::{SimFile, SimProcess, SimProgram, SimRuntime, SimVm};
use vix_core::{BridgeConfig, ErrorCode, Session};
use vix_vm::{
    ConnectOptions, Host, PowerState, Process, SharedFolder, ToolsState, VariableType,
    VirtualMachine, VmError,
};

const VMX: &str = "/vms/ubuntu.vmx";

fn guest() -> SimVm {
    SimVm::new(VMX)
        .name("ubuntu")
        .guest_os("ubuntu-64")
        .program(
            "/bin/echo",
            SimProgram::new(0)
                .pid(4242)
                .elapsed(2)
                .runtime(Duration::from_millis(10)),
        )
        .program("/bin/false", SimProgram::new(1).elapsed(1))
        .program("/bin/bash", SimProgram::new(0).pid(600))
        .process(SimProcess::new("init", 1, "root"))
        .process(SimProcess::new("sshd", 812, "root"))
        .directory(
            "/home/user",
            vec![
                SimFile::file("notes.txt", 120, 1_700_000_000),
                SimFile::dir(".cache", 1_700_000_100),
            ],
        )
}

async fn open(vm: SimVm) -> (Arc<SimRuntime>, VirtualMachine) {
    let sim = Arc::new(SimRuntime::new());
    sim.install_vm(vm);
    let session = Session::new(sim.clone(), BridgeConfig::default());
    let host = Host::connect(session, ConnectOptions::default())
        .await
        .expect("Failed to connect");
    let vm = host.open_vm(VMX).await.expect("Failed to open VM");
    (sim, vm)
}

async fn running(vm: SimVm) -> (Arc<SimRuntime>, VirtualMachine) {
    let (sim, vm) = open(vm).await;
    vm.power_on(false).await.expect("Failed to power on");
    vm.wait_for_tools(Some(Duration::from_secs(30)))
        .await
        .expect("Tools not running");
    vm.login("user", "secret", false)
        .await
        .expect("Failed to log in");
    (sim, vm)
}

#[tokio::test]
async fn test_vm_properties() {
    let (_sim, vm) = open(guest()).await;
    assert_eq!(vm.name().unwrap(), "ubuntu");
    assert_eq!(vm.vmx_path().unwrap(), VMX);
    assert_eq!(vm.guest_os().unwrap(), "ubuntu-64");
    assert_eq!(vm.power_state().unwrap(), PowerState::POWERED_OFF);
    assert!(!vm.is_running().unwrap());
    assert_eq!(vm.tools_state().unwrap(), ToolsState::Unknown);
}

#[tokio::test]
async fn test_host_outlives_its_handle() {
    // `open` drops the Host; the VM keeps the connection alive
    let (sim, vm) = open(guest()).await;
    assert_eq!(sim.live_handles(), 2);
    drop(vm);
    assert_eq!(sim.live_handles(), 0);
}

#[tokio::test]
async fn test_open_unknown_vm() {
    let sim = Arc::new(SimRuntime::new());
    let session = Session::new(sim, BridgeConfig::default());
    let host = Host::connect(session, ConnectOptions::default())
        .await
        .unwrap();
    let err = host.open_vm("/vms/missing.vmx").await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::FILE_NOT_FOUND));
    assert!(matches!(
        host.open_vm("").await,
        Err(VmError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_power_lifecycle() {
    let (sim, vm) = open(guest()).await;

    vm.power_on(false).await.unwrap();
    assert!(vm.power_state().unwrap().is_on());
    assert_eq!(vm.tools_state().unwrap(), ToolsState::Running);

    vm.pause().await.unwrap();
    assert!(vm.power_state().unwrap().contains(PowerState::PAUSED));
    vm.unpause().await.unwrap();
    assert!(!vm.power_state().unwrap().contains(PowerState::PAUSED));

    vm.suspend().await.unwrap();
    assert_eq!(vm.power_state().unwrap(), PowerState::SUSPENDED);

    vm.power_on(false).await.unwrap();
    vm.reset(false).await.unwrap();
    vm.power_off(true).await.unwrap();
    assert_eq!(sim.power_state_of(VMX), Some(PowerState::POWERED_OFF.0));

    let err = vm.reset(false).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::VM_NOT_RUNNING));
}

#[tokio::test]
async fn test_login_and_logout() {
    let (sim, vm) = running(guest()).await;
    assert_eq!(sim.logged_in_user(VMX).as_deref(), Some("user"));
    vm.logout().await.unwrap();
    assert_eq!(sim.logged_in_user(VMX), None);
}

#[tokio::test]
async fn test_wait_for_tools_on_powered_off_vm() {
    let (_sim, vm) = open(guest()).await;
    let err = vm
        .wait_for_tools(Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::TIMEOUT_WAITING_FOR_TOOLS));
}

#[tokio::test]
async fn test_proc_run_blocking() {
    let (_sim, vm) = running(guest()).await;
    let process = vm.proc_run("/bin/echo", Some("hello"), true).await.unwrap();
    assert_eq!(
        process,
        Process {
            pid: 4242,
            exit_code: Some(0),
            elapsed_time: Some(Duration::from_secs(2)),
        }
    );
    assert!(vm.session().registry().is_empty());

    let failed = vm.proc_run("/bin/false", None, true).await.unwrap();
    assert_eq!(failed.exit_code, Some(1));
    assert!(!failed.success());
}

#[tokio::test]
async fn test_proc_run_detached() {
    let (_sim, vm) = running(guest()).await;
    let process = vm.proc_run("/bin/echo", None, false).await.unwrap();
    assert_eq!(process, Process::detached(4242));
    assert_eq!(process.exit_code, None);
    assert_eq!(process.elapsed_time, None);
}

#[tokio::test]
async fn test_run_script_uses_interpreter() {
    let (_sim, vm) = running(guest()).await;
    let process = vm
        .run_script(Some("/bin/bash"), "echo hi", true)
        .await
        .unwrap();
    assert_eq!(process.pid, 600);
    assert_eq!(process.exit_code, Some(0));

    let err = vm
        .run_script(Some("/usr/bin/python3"), "print(1)", true)
        .await
        .unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::FILE_NOT_FOUND));
}

#[tokio::test]
async fn test_concurrent_proc_runs() {
    let (_sim, vm) = running(guest()).await;
    let runs = (0..6).map(|i| {
        let program = if i % 2 == 0 { "/bin/echo" } else { "/bin/false" };
        vm.proc_run(program, None, true)
    });
    let results = futures::future::join_all(runs).await;
    for (i, result) in results.into_iter().enumerate() {
        let process = result.unwrap();
        let expected = if i % 2 == 0 { 0 } else { 1 };
        assert_eq!(process.exit_code, Some(expected));
    }
    assert!(vm.session().registry().is_empty());
}

#[tokio::test]
async fn test_guest_operations_need_running_vm() {
    let (_sim, vm) = open(guest()).await;
    let err = vm.proc_run("/bin/echo", None, true).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::VM_NOT_RUNNING));
    assert!(matches!(
        vm.proc_run("", None, true).await,
        Err(VmError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_proc_list_and_kill() {
    let (_sim, vm) = running(guest()).await;
    let processes = vm.proc_list().await.unwrap();
    let names: Vec<&str> = processes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["init", "sshd"]);
    assert_eq!(processes[1].pid, 812);
    assert_eq!(processes[1].owner, "root");

    vm.proc_kill(812).await.unwrap();
    assert_eq!(vm.proc_list().await.unwrap().len(), 1);

    let err = vm.proc_kill(812).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::NOT_FOUND));
}

#[tokio::test]
async fn test_dir_list() {
    let (_sim, vm) = running(guest()).await;
    let entries = vm.dir_list("/home/user").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "notes.txt");
    assert_eq!(entries[0].size, 120);
    assert!(!entries[0].is_dir);
    assert_eq!(entries[0].last_modified.timestamp(), 1_700_000_000);
    assert!(entries[1].is_dir);

    let json = serde_json::to_value(&entries[1]).unwrap();
    assert_eq!(json["name"], ".cache");
    assert_eq!(json["is_dir"], true);

    let err = vm.dir_list("/nope").await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::FILE_NOT_FOUND));
}

#[tokio::test]
async fn test_snapshot_lifecycle() {
    let (_sim, vm) = open(guest().snapshot("base", "fresh install")).await;
    assert_eq!(vm.num_root_snapshots().unwrap(), 1);

    let base = vm.current_snapshot().unwrap();
    assert_eq!(base.name().unwrap(), "base");
    assert_eq!(base.description().unwrap(), "fresh install");
    assert_eq!(base.power_state().unwrap(), PowerState::POWERED_OFF);

    vm.power_on(false).await.unwrap();
    let live = vm
        .create_snapshot(Some("live"), None, true)
        .await
        .unwrap();
    assert!(live.power_state().unwrap().is_on());
    assert_eq!(base.num_children().unwrap(), 1);
    assert_eq!(base.child(0).unwrap().name().unwrap(), "live");
    assert_eq!(live.parent().unwrap().name().unwrap(), "base");

    vm.revert_to_snapshot(&base, false).await.unwrap();
    assert_eq!(vm.power_state().unwrap(), PowerState::POWERED_OFF);
    assert_eq!(vm.current_snapshot().unwrap().name().unwrap(), "base");

    vm.remove_snapshot(live, false).await.unwrap();
    assert_eq!(base.num_children().unwrap(), 0);
    assert!(vm.named_snapshot("live").is_err());
    assert_eq!(vm.named_snapshot("base").unwrap().name().unwrap(), "base");

    let err = base.parent().unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::NOT_FOUND));
}

#[tokio::test]
async fn test_unmarshalable_launch_leaves_no_record() {
    let (sim, vm) = running(guest()).await;
    let handles = sim.live_handles();
    let err = vm.proc_run("/bin/echo", Some("a\0b"), true).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::INVALID_ARG));
    assert!(vm.session().registry().is_empty());
    assert_eq!(sim.live_handles(), handles);

    // The session is still usable afterwards
    let process = vm.proc_run("/bin/echo", None, true).await.unwrap();
    assert_eq!(process.exit_code, Some(0));
}

#[tokio::test]
async fn test_clone_and_delete() {
    let (sim, vm) = open(guest().snapshot("base", "")).await;
    let base = vm.current_snapshot().unwrap();

    let clone = vm
        .clone_vm("/vms/ubuntu-clone.vmx", Some(&base), true)
        .await
        .unwrap();
    assert_eq!(clone.name().unwrap(), "ubuntu-clone");
    assert_eq!(clone.vmx_path().unwrap(), "/vms/ubuntu-clone.vmx");
    assert_eq!(clone.num_root_snapshots().unwrap(), 0);
    assert!(sim.has_vm("/vms/ubuntu-clone.vmx"));

    let err = vm.clone_vm(VMX, None, false).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::FILE_ALREADY_EXISTS));
    assert!(matches!(
        vm.clone_vm("", None, false).await,
        Err(VmError::InvalidArgument(_))
    ));

    clone.delete(true).await.unwrap();
    assert!(!sim.has_vm("/vms/ubuntu-clone.vmx"));
    assert!(sim.has_vm(VMX));

    vm.power_on(false).await.unwrap();
    let err = vm.delete(false).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::VM_IS_RUNNING));
}

#[tokio::test]
async fn test_variables() {
    let (_sim, vm) = open(guest()).await;
    vm.write_variable(VariableType::ConfigRuntime, "uuid.action", "keep")
        .await
        .unwrap();
    assert_eq!(
        vm.read_variable(VariableType::ConfigRuntime, "uuid.action")
            .await
            .unwrap(),
        "keep"
    );
    let err = vm
        .read_variable(VariableType::Guest, "build")
        .await
        .unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::VM_NOT_RUNNING));

    vm.power_on(false).await.unwrap();
    vm.write_variable(VariableType::Guest, "build", "42")
        .await
        .unwrap();
    assert_eq!(
        vm.read_variable(VariableType::Guest, "build").await.unwrap(),
        "42"
    );
    // Namespaces are separate and unset names read as empty
    assert_eq!(
        vm.read_variable(VariableType::GuestEnvironment, "build")
            .await
            .unwrap(),
        ""
    );
}

#[tokio::test]
async fn test_shared_folders() {
    let (sim, vm) = running(guest()).await;
    vm.enable_shared_folders(true).await.unwrap();
    assert_eq!(sim.shared_folders_enabled(VMX), Some(true));

    vm.add_shared_folder("src", "/home/me/src", true).await.unwrap();
    vm.add_shared_folder("docs", "/home/me/docs", false)
        .await
        .unwrap();
    assert_eq!(vm.shared_folder_count().await.unwrap(), 2);
    assert_eq!(
        vm.shared_folder_state(1).await.unwrap(),
        SharedFolder {
            name: "docs".into(),
            host_path: "/home/me/docs".into(),
            write_access: false,
        }
    );

    let err = vm
        .add_shared_folder("src", "/tmp", false)
        .await
        .unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::FILE_ALREADY_EXISTS));

    vm.set_shared_folder_state("docs", "/srv/docs", true)
        .await
        .unwrap();
    vm.remove_shared_folder("src").await.unwrap();
    let folders = vm.shared_folders().await.unwrap();
    assert_eq!(
        folders,
        vec![SharedFolder {
            name: "docs".into(),
            host_path: "/srv/docs".into(),
            write_access: true,
        }]
    );
    let json = serde_json::to_value(&folders[0]).unwrap();
    assert_eq!(json["write_access"], true);

    let err = vm.remove_shared_folder("src").await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::NOT_FOUND));
    let err = vm.shared_folder_state(5).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::INVALID_ARG));
}

#[tokio::test]
async fn test_tools_install_and_hardware_upgrade() {
    let (sim, vm) = open(guest()).await;
    let before = sim.hardware_version_of(VMX).unwrap();
    vm.upgrade_virtual_hardware().await.unwrap();
    assert_eq!(sim.hardware_version_of(VMX), Some(before + 1));

    let err = vm.install_tools(false, true).await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::VM_NOT_RUNNING));

    vm.power_on(false).await.unwrap();
    vm.install_tools(false, true).await.unwrap();
    vm.install_tools(true, false).await.unwrap();
    assert_eq!(vm.tools_state().unwrap(), ToolsState::Running);

    let err = vm.upgrade_virtual_hardware().await.unwrap_err();
    assert_eq!(err.native_code(), Some(ErrorCode::VM_IS_RUNNING));
}

#[cfg(feature = "vix-ffi")]
mod vix_library {
    use super::*;
    use vix_core::ffi::VixLibrary;

    /// Test a real guest run against VMware Workstation.
    #[tokio::test]
    #[ignore = "requires VMware Workstation + VIX + a guest with tools"]
    async fn test_guest_run() {
        let Ok(vmx) = std::env::var("VIX_VMX") else {
            eprintln!("Skipping test: set VIX_VMX, VIX_GUEST_USER and VIX_GUEST_PASSWORD");
            return;
        };
        let user = std::env::var("VIX_GUEST_USER").unwrap_or_default();
        let password = std::env::var("VIX_GUEST_PASSWORD").unwrap_or_default();

        let session = Session::new(Arc::new(VixLibrary::new()), BridgeConfig::default());
        let host = Host::connect(session, ConnectOptions::default())
            .await
            .expect("Failed to connect");
        let vm = host.open_vm(&vmx).await.expect("Failed to open VM");
        vm.power_on(false).await.expect("Failed to power on");
        vm.wait_for_tools(Some(Duration::from_secs(300)))
            .await
            .expect("Tools not running");
        vm.login(&user, &password, false)
            .await
            .expect("Failed to log in");

        let process = vm
            .proc_run("/bin/true", None, true)
            .await
            .expect("Failed to run program");
        assert_eq!(process.exit_code, Some(0));
    }
}
