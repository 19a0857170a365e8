//! Simulated host for `--simulate`.

use std::sync::Arc;
use std::time::Duration;
use vix_core::sim::{SimFile, SimProcess, SimProgram, SimRuntime, SimSharedFolder, SimVm};

pub const DEFAULT_VMX: &str = "/vms/demo/demo.vmx";

/// A host with one running VM at `vmx_path`.
pub fn runtime(vmx_path: &str) -> Arc<SimRuntime> {
    let sim = Arc::new(SimRuntime::new());
    sim.install_vm(
        SimVm::new(vmx_path)
            .guest_os("ubuntu-64")
            .powered_on()
            .program("/bin/true", SimProgram::new(0))
            .program("/bin/false", SimProgram::new(1))
            .program(
                "/bin/sleep",
                SimProgram::new(0).elapsed(1).runtime(Duration::from_secs(1)),
            )
            .program("/bin/sh", SimProgram::new(0))
            .process(SimProcess::new("systemd", 1, "root"))
            .process(SimProcess::new("sshd", 812, "root"))
            .process(SimProcess::new("bash", 1450, "user"))
            .directory(
                "/home/user",
                vec![
                    SimFile::file(".bashrc", 3771, 1_700_000_000),
                    SimFile::dir("projects", 1_700_086_400),
                ],
            )
            .shared_folder(SimSharedFolder {
                name: "host-home".into(),
                host_path: "/home/demo".into(),
                flags: 0,
            })
            .snapshot("clean", "Fresh install"),
    );
    sim
}
