//! The native handle layer consumed by the core.
//!
//! [`NativeApi`] is the seam between the bridge and the VIX library. The
//! production implementation lives in `ffi` (behind the `vix-ffi` feature);
//! [`SimRuntime`](crate::sim::SimRuntime) implements it in-process.

use crate::error::ErrorCode;
use crate::handle::RawHandle;
use crate::property::{PropertyId, PropertyValue};
use crate::registry::Token;
use std::fmt;
use std::sync::Arc;

/// Result of a raw native call.
pub type NativeResult<T> = std::result::Result<T, ErrorCode>;

/// A `VixEventType` delivered to a job callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType(pub i32);

impl EventType {
    pub const JOB_COMPLETED: EventType = EventType(2);
    pub const JOB_PROGRESS: EventType = EventType(3);
    pub const FIND_ITEM: EventType = EventType(8);
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EventType::JOB_COMPLETED => write!(f, "job-completed"),
            EventType::JOB_PROGRESS => write!(f, "job-progress"),
            EventType::FIND_ITEM => write!(f, "find-item"),
            EventType(other) => write!(f, "event({other})"),
        }
    }
}

/// Receiver of native job events.
///
/// Called on a thread owned by the native runtime. Implementations must not
/// panic and must not block for long.
pub trait EventSink: Send + Sync {
    fn on_event(&self, handle: RawHandle, event: EventType, token: Token);
}

/// A callback registration passed along with an asynchronous native call.
///
/// `token` is the opaque context the runtime hands back with every event.
#[derive(Clone)]
pub struct Subscription {
    pub sink: Arc<dyn EventSink>,
    pub token: Token,
}

impl Subscription {
    pub fn new(sink: Arc<dyn EventSink>, token: Token) -> Self {
        Self { sink, token }
    }

    /// Forward an event to the sink.
    pub fn deliver(&self, handle: RawHandle, event: EventType) {
        self.sink.on_event(handle, event, self.token);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// VIX service provider selected at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProvider {
    Default,
    Server,
    Workstation,
    Player,
    WorkstationShared,
    VmwareViServer,
}

impl ServiceProvider {
    pub fn raw(self) -> i32 {
        match self {
            ServiceProvider::Default => 1,
            ServiceProvider::Server => 2,
            ServiceProvider::Workstation => 3,
            ServiceProvider::Player => 4,
            ServiceProvider::VmwareViServer => 10,
            ServiceProvider::WorkstationShared => 11,
        }
    }
}

/// Power operation option bits (`VIX_VMPOWEROP_*`).
pub mod power_op {
    pub const NORMAL: i32 = 0;
    pub const FROM_GUEST: i32 = 0x0004;
    pub const SUPPRESS_SNAPSHOT_POWERON: i32 = 0x0080;
    pub const LAUNCH_GUI: i32 = 0x0200;
    pub const START_VM_PAUSED: i32 = 0x1000;
}

/// Guest program option bits (`VIX_RUNPROGRAM_*`).
pub mod run_program {
    pub const RETURN_IMMEDIATELY: i32 = 0x0001;
    pub const ACTIVATE_WINDOW: i32 = 0x0002;
}

/// VM power state bits (`VIX_POWERSTATE_*`).
pub mod power_state {
    pub const POWERING_OFF: i32 = 0x0001;
    pub const POWERED_OFF: i32 = 0x0002;
    pub const POWERING_ON: i32 = 0x0004;
    pub const POWERED_ON: i32 = 0x0008;
    pub const SUSPENDING: i32 = 0x0010;
    pub const SUSPENDED: i32 = 0x0020;
    pub const TOOLS_RUNNING: i32 = 0x0040;
    pub const RESETTING: i32 = 0x0080;
    pub const BLOCKED_ON_MSG: i32 = 0x0100;
    pub const PAUSED: i32 = 0x0200;
    pub const RESUMING: i32 = 0x0800;
}

/// VMware Tools state (`VIX_TOOLSSTATE_*`).
pub mod tools_state {
    pub const UNKNOWN: i32 = 0x0001;
    pub const RUNNING: i32 = 0x0002;
    pub const NOT_INSTALLED: i32 = 0x0004;
}

/// Guest file attribute bits (`VIX_FILE_ATTRIBUTES_*`).
pub mod file_attributes {
    pub const DIRECTORY: i32 = 0x0001;
    pub const SYMLINK: i32 = 0x0002;
}

/// Clone kinds (`VIX_CLONETYPE_*`).
pub mod clone_type {
    pub const FULL: i32 = 0;
    pub const LINKED: i32 = 1;
}

/// Namespaces for `VixVM_ReadVariable` and `VixVM_WriteVariable`.
pub mod variable_type {
    pub const GUEST_VARIABLE: i32 = 1;
    pub const CONFIG_RUNTIME_ONLY: i32 = 2;
    pub const GUEST_ENVIRONMENT_VARIABLE: i32 = 3;
}

/// Tools installer option bits (`VIX_INSTALLTOOLS_*`).
pub mod install_tools {
    pub const MOUNT_TOOLS_INSTALLER: i32 = 0x00;
    pub const AUTO_UPGRADE: i32 = 0x01;
    pub const RETURN_IMMEDIATELY: i32 = 0x02;
}

pub const LOGIN_REQUIRE_INTERACTIVE_ENVIRONMENT: i32 = 0x08;
pub const SNAPSHOT_REMOVE_CHILDREN: i32 = 0x0001;
pub const SNAPSHOT_INCLUDE_MEMORY: i32 = 0x0002;
pub const VMDELETE_DISK_FILES: i32 = 0x0002;
pub const SHAREDFOLDER_WRITE_ACCESS: i32 = 0x04;

/// An asynchronous native operation. Each variant maps to one `Vix*` entry
/// point that returns a job handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect {
        provider: ServiceProvider,
        host: Option<String>,
        port: i32,
        user: Option<String>,
        password: Option<String>,
    },
    OpenVm {
        vmx_path: String,
    },
    PowerOn {
        options: i32,
    },
    PowerOff {
        options: i32,
    },
    Reset {
        options: i32,
    },
    Suspend,
    Pause,
    Unpause,
    WaitForTools {
        timeout_secs: i32,
    },
    LoginInGuest {
        user: String,
        password: String,
        options: i32,
    },
    LogoutFromGuest,
    RunProgramInGuest {
        program: String,
        args: Option<String>,
        options: i32,
    },
    RunScriptInGuest {
        interpreter: Option<String>,
        script: String,
        options: i32,
    },
    KillProcessInGuest {
        pid: u64,
    },
    ListProcessesInGuest,
    ListDirectoryInGuest {
        path: String,
    },
    CreateSnapshot {
        name: Option<String>,
        description: Option<String>,
        options: i32,
    },
    RevertToSnapshot {
        snapshot: RawHandle,
        options: i32,
    },
    RemoveSnapshot {
        snapshot: RawHandle,
        options: i32,
    },
    /// `snapshot` is `RawHandle::INVALID` to clone the current state.
    CloneVm {
        snapshot: RawHandle,
        clone_type: i32,
        dest_vmx: String,
    },
    DeleteVm {
        options: i32,
    },
    ReadVariable {
        var_type: i32,
        name: String,
    },
    WriteVariable {
        var_type: i32,
        name: String,
        value: String,
    },
    InstallTools {
        options: i32,
    },
    UpgradeVirtualHardware,
    AddSharedFolder {
        name: String,
        host_path: String,
        flags: i32,
    },
    EnableSharedFolders {
        enabled: bool,
    },
    GetNumSharedFolders,
    GetSharedFolderState {
        index: i32,
    },
    RemoveSharedFolder {
        name: String,
    },
    SetSharedFolderState {
        name: String,
        host_path: String,
        flags: i32,
    },
}

impl Operation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Connect { .. } => "connect",
            Operation::OpenVm { .. } => "open_vm",
            Operation::PowerOn { .. } => "power_on",
            Operation::PowerOff { .. } => "power_off",
            Operation::Reset { .. } => "reset",
            Operation::Suspend => "suspend",
            Operation::Pause => "pause",
            Operation::Unpause => "unpause",
            Operation::WaitForTools { .. } => "wait_for_tools",
            Operation::LoginInGuest { .. } => "login_in_guest",
            Operation::LogoutFromGuest => "logout_from_guest",
            Operation::RunProgramInGuest { .. } => "run_program_in_guest",
            Operation::RunScriptInGuest { .. } => "run_script_in_guest",
            Operation::KillProcessInGuest { .. } => "kill_process_in_guest",
            Operation::ListProcessesInGuest => "list_processes_in_guest",
            Operation::ListDirectoryInGuest { .. } => "list_directory_in_guest",
            Operation::CreateSnapshot { .. } => "create_snapshot",
            Operation::RevertToSnapshot { .. } => "revert_to_snapshot",
            Operation::RemoveSnapshot { .. } => "remove_snapshot",
            Operation::CloneVm { .. } => "clone_vm",
            Operation::DeleteVm { .. } => "delete_vm",
            Operation::ReadVariable { .. } => "read_variable",
            Operation::WriteVariable { .. } => "write_variable",
            Operation::InstallTools { .. } => "install_tools",
            Operation::UpgradeVirtualHardware => "upgrade_virtual_hardware",
            Operation::AddSharedFolder { .. } => "add_shared_folder",
            Operation::EnableSharedFolders { .. } => "enable_shared_folders",
            Operation::GetNumSharedFolders => "get_num_shared_folders",
            Operation::GetSharedFolderState { .. } => "get_shared_folder_state",
            Operation::RemoveSharedFolder { .. } => "remove_shared_folder",
            Operation::SetSharedFolderState { .. } => "set_shared_folder_state",
        }
    }

    /// String arguments passed to the library as C strings.
    pub fn strings(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        match self {
            Operation::Connect { host, user, password, .. } => {
                out.extend(host.as_deref());
                out.extend(user.as_deref());
                out.extend(password.as_deref());
            }
            Operation::OpenVm { vmx_path } => out.push(vmx_path),
            Operation::LoginInGuest { user, password, .. } => {
                out.push(user);
                out.push(password);
            }
            Operation::RunProgramInGuest { program, args, .. } => {
                out.push(program);
                out.extend(args.as_deref());
            }
            Operation::RunScriptInGuest {
                interpreter,
                script,
                ..
            } => {
                out.extend(interpreter.as_deref());
                out.push(script);
            }
            Operation::ListDirectoryInGuest { path } => out.push(path),
            Operation::CreateSnapshot {
                name, description, ..
            } => {
                out.extend(name.as_deref());
                out.extend(description.as_deref());
            }
            Operation::CloneVm { dest_vmx, .. } => out.push(dest_vmx),
            Operation::ReadVariable { name, .. } | Operation::RemoveSharedFolder { name } => {
                out.push(name)
            }
            Operation::WriteVariable { name, value, .. } => {
                out.push(name);
                out.push(value);
            }
            Operation::AddSharedFolder {
                name, host_path, ..
            }
            | Operation::SetSharedFolderState {
                name, host_path, ..
            } => {
                out.push(name);
                out.push(host_path);
            }
            _ => {}
        }
        out
    }

    /// Whether this operation launches a guest process whose completion is
    /// reported through the event callback.
    pub fn launches_process(&self) -> bool {
        matches!(
            self,
            Operation::RunProgramInGuest { .. } | Operation::RunScriptInGuest { .. }
        )
    }
}

/// A synchronous call that yields a new handle derived from a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derivation {
    CurrentSnapshot,
    NamedSnapshot(String),
    RootSnapshot(usize),
    SnapshotChild(usize),
    SnapshotParent,
}

/// A synchronous count query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countable {
    RootSnapshots,
    SnapshotChildren,
}

/// Capability set of the native VIX runtime.
///
/// All methods are synchronous; `job_wait` blocks the calling thread. Handles
/// returned by `issue` and `derive` carry one reference owned by the caller.
pub trait NativeApi: Send + Sync {
    /// `Vix_GetHandleType`. Unknown or invalid handles report `HandleType::None`.
    fn handle_type(&self, handle: RawHandle) -> crate::handle::HandleType;

    /// `Vix_AddRefHandle`.
    fn add_ref(&self, handle: RawHandle);

    /// `Vix_ReleaseHandle`.
    fn release(&self, handle: RawHandle);

    /// `Vix_GetProperties`: all requested values in one round-trip.
    fn get_properties(
        &self,
        handle: RawHandle,
        ids: &[PropertyId],
    ) -> NativeResult<Vec<PropertyValue>>;

    /// Start an asynchronous operation against `target` and return its job.
    ///
    /// Fails when the call cannot be made at all, e.g. an argument that does
    /// not marshal. The subscription is dropped in that case and no event is
    /// ever delivered for it.
    fn issue(
        &self,
        target: RawHandle,
        op: &Operation,
        events: Option<Subscription>,
    ) -> NativeResult<RawHandle>;

    /// Synchronously obtain a handle derived from `parent`.
    fn derive(&self, parent: RawHandle, derivation: &Derivation) -> NativeResult<RawHandle>;

    /// Synchronous count query on `handle`.
    fn count(&self, handle: RawHandle, what: Countable) -> NativeResult<usize>;

    /// `VixJob_Wait`: block until done, then read result properties.
    fn job_wait(&self, job: RawHandle, ids: &[PropertyId]) -> NativeResult<Vec<PropertyValue>>;

    /// `VixJob_CheckCompletion`.
    fn job_check_completion(&self, job: RawHandle) -> NativeResult<bool>;

    /// `VixJob_GetError`.
    fn job_error(&self, job: RawHandle) -> ErrorCode;

    /// `VixJob_GetNumProperties`.
    fn job_num_rows(&self, job: RawHandle, id: PropertyId) -> usize;

    /// `VixJob_GetNthProperties`.
    fn job_nth_row(
        &self,
        job: RawHandle,
        index: usize,
        ids: &[PropertyId],
    ) -> NativeResult<Vec<PropertyValue>>;
}
