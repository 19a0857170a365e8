//! # vix-vm
//!
//! Host, virtual machine and snapshot API for the VMware VIX library.
//! Built on the handle and job layer of `vix-core`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vix_core::sim::{SimProgram, SimRuntime, SimVm};
//! use vix_core::{BridgeConfig, Session};
//! use vix_vm::{ConnectOptions, Host};
//!
//! # async fn example() -> vix_vm::Result<()> {
//! let sim = Arc::new(SimRuntime::new());
//! sim.install_vm(SimVm::new("/vms/dev.vmx").program("/bin/true", SimProgram::new(0)));
//!
//! let session = Session::new(sim, BridgeConfig::default());
//! let host = Host::connect(session, ConnectOptions::default()).await?;
//! let vm = host.open_vm("/vms/dev.vmx").await?;
//!
//! vm.power_on(false).await?;
//! vm.wait_for_tools(None).await?;
//! vm.login("user", "secret", false).await?;
//!
//! // Block until the guest program exits
//! let process = vm.proc_run("/bin/true", None, true).await?;
//! println!("pid {} exited with {:?}", process.pid, process.exit_code);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Power Operations**: Power on/off, reset, suspend, pause
//! - **Guest Programs**: Run programs and scripts, blocking or detached
//! - **Guest Listings**: Processes and directories, in guest order
//! - **Snapshots**: Create, navigate, revert and remove
//! - **VM Management**: Clone, delete, variables, tools install, hardware upgrade
//! - **Shared Folders**: Add, inspect, update and remove host shares

mod error;
mod guest;
mod host;
mod power;
mod shared_folder;
mod snapshot;
mod vm;

pub use error::{Result, VmError};
pub use guest::{DirectoryEntry, ProcessListEntry};
pub use host::{ConnectOptions, Host};
pub use power::{PowerState, ToolsState};
pub use shared_folder::SharedFolder;
pub use snapshot::Snapshot;
pub use vix_core::Process;
pub use vm::{VariableType, VirtualMachine};
