//! In-process simulation of a VIX host.
//!
//! [`SimRuntime`] implements [`NativeApi`] without the VMware library. Handles
//! are reference counted, jobs complete on background threads after a short
//! latency, and guest process launches deliver progress and completion
//! events to their subscription from those threads, never while the
//! simulator's lock is held. Used by the test suites and by `vixctl
//! --simulate`.
//!
//! ```text
//!   issue() ──▶ job (pending) ──latency + runtime──▶ job (done)
//!                                                     │
//!                             progress, completed ◀───┘  (if subscribed)
//! ```

use crate::error::ErrorCode;
use crate::handle::{HandleType, RawHandle};
use crate::native::{
    file_attributes, install_tools, power_state, run_program, tools_state, variable_type,
    Countable, Derivation, EventType, NativeApi, NativeResult, Operation, Subscription,
    SNAPSHOT_REMOVE_CHILDREN,
};
use crate::property::{PropertyId, PropertyValue};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Props = Vec<(PropertyId, PropertyValue)>;

const DEFAULT_LATENCY: Duration = Duration::from_millis(5);
const FIRST_PID: u64 = 1000;
const DEFAULT_INTERPRETER: &str = "/bin/sh";
const DEFAULT_HARDWARE_VERSION: i32 = 7;
const TOOLS_INSTALL_TIME: Duration = Duration::from_millis(20);

/// Behaviour of a program that can be launched in a simulated guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimProgram {
    pid: Option<u64>,
    exit_code: i32,
    elapsed: i32,
    runtime: Duration,
    completion_pid: Option<u64>,
    stray_event: Option<EventType>,
    lost_completion: bool,
}

impl SimProgram {
    pub fn new(exit_code: i32) -> Self {
        Self {
            pid: None,
            exit_code,
            elapsed: 0,
            runtime: Duration::ZERO,
            completion_pid: None,
            stray_event: None,
            lost_completion: false,
        }
    }

    /// Fixed pid instead of the next free one.
    pub fn pid(mut self, pid: u64) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Raw elapsed-time value reported on completion.
    pub fn elapsed(mut self, raw: i32) -> Self {
        self.elapsed = raw;
        self
    }

    /// How long the program runs before it exits.
    pub fn runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    /// Report a different pid in the completion event than at launch.
    pub fn completion_pid(mut self, pid: u64) -> Self {
        self.completion_pid = Some(pid);
        self
    }

    /// Deliver an extra event of this type before completion.
    pub fn stray_event(mut self, event: EventType) -> Self {
        self.stray_event = Some(event);
        self
    }

    /// Never deliver the completion event.
    pub fn lose_completion(mut self) -> Self {
        self.lost_completion = true;
        self
    }
}

/// A row of the simulated guest process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimProcess {
    pub name: String,
    pub pid: u64,
    pub owner: String,
    pub command: String,
    pub being_debugged: bool,
    pub start_time: i64,
}

impl SimProcess {
    pub fn new(name: impl Into<String>, pid: u64, owner: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            command: name.clone(),
            name,
            pid,
            owner: owner.into(),
            being_debugged: false,
            start_time: 0,
        }
    }
}

/// An entry of a simulated guest directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFile {
    pub name: String,
    pub size: i64,
    pub flags: i32,
    pub modified: i64,
}

impl SimFile {
    pub fn file(name: impl Into<String>, size: i64, modified: i64) -> Self {
        Self {
            name: name.into(),
            size,
            flags: 0,
            modified,
        }
    }

    pub fn dir(name: impl Into<String>, modified: i64) -> Self {
        Self {
            name: name.into(),
            size: 0,
            flags: file_attributes::DIRECTORY,
            modified,
        }
    }
}

/// A host directory shared with a simulated guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSharedFolder {
    pub name: String,
    pub host_path: String,
    pub flags: i32,
}

#[derive(Debug, Clone)]
struct SimSnapshot {
    name: String,
    description: String,
    parent: Option<usize>,
    power_state: i32,
    removed: bool,
}

/// A simulated virtual machine.
#[derive(Debug, Clone)]
pub struct SimVm {
    vmx_path: String,
    name: String,
    guest_os: String,
    num_vcpus: i32,
    memory_mib: i32,
    power_state: i32,
    logged_in: Option<String>,
    programs: HashMap<String, SimProgram>,
    processes: Vec<SimProcess>,
    directories: HashMap<String, Vec<SimFile>>,
    snapshots: Vec<SimSnapshot>,
    current_snapshot: Option<usize>,
    variables: HashMap<(i32, String), String>,
    shared_folders: Vec<SimSharedFolder>,
    shared_folders_enabled: bool,
    hardware_version: i32,
    deleted: bool,
}

impl SimVm {
    /// A powered-off VM named after the stem of `vmx_path`.
    pub fn new(vmx_path: impl Into<String>) -> Self {
        let vmx_path = vmx_path.into();
        let name = std::path::Path::new(&vmx_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| vmx_path.clone());
        Self {
            vmx_path,
            name,
            guest_os: "other-64".into(),
            num_vcpus: 1,
            memory_mib: 1024,
            power_state: power_state::POWERED_OFF,
            logged_in: None,
            programs: HashMap::new(),
            processes: Vec::new(),
            directories: HashMap::new(),
            snapshots: Vec::new(),
            current_snapshot: None,
            variables: HashMap::new(),
            shared_folders: Vec::new(),
            shared_folders_enabled: false,
            hardware_version: DEFAULT_HARDWARE_VERSION,
            deleted: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn guest_os(mut self, guest_os: impl Into<String>) -> Self {
        self.guest_os = guest_os.into();
        self
    }

    /// Start powered on with tools running.
    pub fn powered_on(mut self) -> Self {
        self.power_state = power_state::POWERED_ON | power_state::TOOLS_RUNNING;
        self
    }

    /// Make `path` launchable in the guest.
    pub fn program(mut self, path: impl Into<String>, program: SimProgram) -> Self {
        self.programs.insert(path.into(), program);
        self
    }

    pub fn process(mut self, process: SimProcess) -> Self {
        self.processes.push(process);
        self
    }

    pub fn directory(mut self, path: impl Into<String>, entries: Vec<SimFile>) -> Self {
        self.directories.insert(path.into(), entries);
        self
    }

    /// Preset a variable in one of the `variable_type` namespaces.
    pub fn variable(
        mut self,
        var_type: i32,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.variables.insert((var_type, name.into()), value.into());
        self
    }

    pub fn shared_folder(mut self, folder: SimSharedFolder) -> Self {
        self.shared_folders.push(folder);
        self
    }

    /// Take a snapshot as a child of the current one and make it current.
    pub fn snapshot(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.take_snapshot(name.into(), description.into());
        self
    }

    fn take_snapshot(&mut self, name: String, description: String) -> usize {
        self.snapshots.push(SimSnapshot {
            name,
            description,
            parent: self.current_snapshot,
            power_state: self.power_state,
            removed: false,
        });
        let index = self.snapshots.len() - 1;
        self.current_snapshot = Some(index);
        index
    }

    /// An unconfigured copy at `vmx_path`: powered off, no snapshots.
    fn clone_to(&self, vmx_path: &str) -> SimVm {
        let mut copy = SimVm::new(vmx_path);
        copy.guest_os = self.guest_os.clone();
        copy.num_vcpus = self.num_vcpus;
        copy.memory_mib = self.memory_mib;
        copy.programs = self.programs.clone();
        copy.directories = self.directories.clone();
        copy.shared_folders = self.shared_folders.clone();
        copy.hardware_version = self.hardware_version;
        copy
    }

    fn shared_folder_index(&self, name: &str) -> Result<usize, ErrorCode> {
        self.shared_folders
            .iter()
            .position(|f| f.name == name)
            .ok_or(ErrorCode::NOT_FOUND)
    }

    fn is_on(&self) -> bool {
        self.power_state & power_state::POWERED_ON != 0
    }

    fn live_snapshots(&self, parent: Option<usize>) -> Vec<usize> {
        self.snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.removed && s.parent == parent)
            .map(|(i, _)| i)
            .collect()
    }

    fn property(&self, id: PropertyId) -> Option<PropertyValue> {
        let value = match id {
            PropertyId::VM_NAME => PropertyValue::String(self.name.clone()),
            PropertyId::VM_VMX_PATHNAME => PropertyValue::String(self.vmx_path.clone()),
            PropertyId::VM_GUESTOS => PropertyValue::String(self.guest_os.clone()),
            PropertyId::VM_NUM_VCPUS => PropertyValue::Integer(self.num_vcpus),
            PropertyId::VM_MEMORY_SIZE => PropertyValue::Integer(self.memory_mib),
            PropertyId::VM_READ_ONLY => PropertyValue::Bool(false),
            PropertyId::VM_POWER_STATE => PropertyValue::Integer(self.power_state),
            PropertyId::VM_IS_RUNNING => PropertyValue::Bool(self.is_on()),
            PropertyId::VM_TOOLS_STATE => PropertyValue::Integer(
                if self.power_state & power_state::TOOLS_RUNNING != 0 {
                    tools_state::RUNNING
                } else {
                    tools_state::UNKNOWN
                },
            ),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug)]
struct SimJob {
    done: bool,
    error: ErrorCode,
    results: Props,
    rows: Vec<Props>,
}

#[derive(Debug)]
enum Body {
    Host,
    Vm(usize),
    Snapshot { vm: usize, index: usize },
    Job(SimJob),
}

#[derive(Debug)]
struct SimObject {
    kind: HandleType,
    refs: u32,
    body: Body,
}

/// What an issued operation will produce once it completes.
#[derive(Debug, Default)]
struct Outcome {
    error: ErrorCode,
    results: Props,
    rows: Vec<Props>,
    runtime: Duration,
    program: Option<SimProgram>,
}

impl Outcome {
    fn ok(results: Props) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    fn rows(rows: Vec<Props>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn failed(error: ErrorCode) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct SimState {
    next_handle: i32,
    next_pid: u64,
    objects: HashMap<RawHandle, SimObject>,
    vms: Vec<SimVm>,
    double_releases: usize,
}

impl SimState {
    fn alloc(&mut self, kind: HandleType, body: Body) -> RawHandle {
        let raw = RawHandle(self.next_handle);
        self.next_handle += 1;
        self.objects.insert(
            raw,
            SimObject {
                kind,
                refs: 1,
                body,
            },
        );
        raw
    }

    fn alloc_job(&mut self, job: SimJob) -> RawHandle {
        self.alloc(HandleType::Job, Body::Job(job))
    }

    fn release(&mut self, raw: RawHandle) {
        match self.objects.get_mut(&raw) {
            Some(object) => {
                object.refs -= 1;
                if object.refs == 0 {
                    self.objects.remove(&raw);
                }
            }
            None => {
                self.double_releases += 1;
                tracing::warn!(handle = %raw, "Release of a freed handle");
            }
        }
    }

    fn vm_index(&self, target: RawHandle) -> Result<usize, ErrorCode> {
        match self.objects.get(&target).map(|o| &o.body) {
            Some(Body::Vm(index)) if self.vms[*index].deleted => Err(ErrorCode::FILE_NOT_FOUND),
            Some(Body::Vm(index)) => Ok(*index),
            Some(_) => Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(ErrorCode::INVALID_HANDLE),
        }
    }

    fn snapshot_of(&self, raw: RawHandle) -> Result<(usize, usize), ErrorCode> {
        match self.objects.get(&raw).map(|o| &o.body) {
            Some(Body::Snapshot { vm, index }) if !self.vms[*vm].snapshots[*index].removed => {
                Ok((*vm, *index))
            }
            Some(Body::Snapshot { .. }) => Err(ErrorCode::NOT_FOUND),
            Some(_) => Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(ErrorCode::INVALID_HANDLE),
        }
    }

    fn running_vm(&mut self, target: RawHandle) -> Result<&mut SimVm, ErrorCode> {
        let index = self.vm_index(target)?;
        let vm = &mut self.vms[index];
        if !vm.is_on() {
            return Err(ErrorCode::VM_NOT_RUNNING);
        }
        Ok(vm)
    }

    fn snapshot_handle(&mut self, vm: usize, index: usize) -> RawHandle {
        self.alloc(HandleType::Snapshot, Body::Snapshot { vm, index })
    }

    /// Apply `op` to the simulated world and describe its job results.
    fn run(&mut self, target: RawHandle, op: &Operation) -> Outcome {
        match self.try_run(target, op) {
            Ok(outcome) => outcome,
            Err(code) => Outcome::failed(code),
        }
    }

    fn try_run(&mut self, target: RawHandle, op: &Operation) -> Result<Outcome, ErrorCode> {
        match op {
            Operation::Connect { .. } => {
                let host = self.alloc(HandleType::Host, Body::Host);
                Ok(Outcome::ok(vec![(
                    PropertyId::JOB_RESULT_HANDLE,
                    PropertyValue::Handle(host),
                )]))
            }
            Operation::OpenVm { vmx_path } => {
                match self.objects.get(&target).map(|o| &o.body) {
                    Some(Body::Host) => {}
                    Some(_) => return Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
                    None => return Err(ErrorCode::INVALID_HANDLE),
                }
                let index = self
                    .vms
                    .iter()
                    .position(|vm| !vm.deleted && &vm.vmx_path == vmx_path)
                    .ok_or(ErrorCode::FILE_NOT_FOUND)?;
                let vm = self.alloc(HandleType::Vm, Body::Vm(index));
                Ok(Outcome::ok(vec![(
                    PropertyId::JOB_RESULT_HANDLE,
                    PropertyValue::Handle(vm),
                )]))
            }
            Operation::PowerOn { .. } => {
                let index = self.vm_index(target)?;
                let vm = &mut self.vms[index];
                vm.power_state = power_state::POWERED_ON | power_state::TOOLS_RUNNING;
                Ok(Outcome::default())
            }
            Operation::PowerOff { .. } => {
                let index = self.vm_index(target)?;
                let vm = &mut self.vms[index];
                vm.power_state = power_state::POWERED_OFF;
                vm.logged_in = None;
                Ok(Outcome::default())
            }
            Operation::Reset { .. } => {
                let vm = self.running_vm(target)?;
                vm.power_state = power_state::POWERED_ON | power_state::TOOLS_RUNNING;
                vm.logged_in = None;
                Ok(Outcome::default())
            }
            Operation::Suspend => {
                let vm = self.running_vm(target)?;
                vm.power_state = power_state::SUSPENDED;
                vm.logged_in = None;
                Ok(Outcome::default())
            }
            Operation::Pause => {
                let vm = self.running_vm(target)?;
                vm.power_state |= power_state::PAUSED;
                Ok(Outcome::default())
            }
            Operation::Unpause => {
                let vm = self.running_vm(target)?;
                vm.power_state &= !power_state::PAUSED;
                Ok(Outcome::default())
            }
            Operation::WaitForTools { .. } => {
                let index = self.vm_index(target)?;
                if self.vms[index].power_state & power_state::TOOLS_RUNNING == 0 {
                    return Err(ErrorCode::TIMEOUT_WAITING_FOR_TOOLS);
                }
                Ok(Outcome::default())
            }
            Operation::LoginInGuest { user, .. } => {
                let vm = self.running_vm(target)?;
                vm.logged_in = Some(user.clone());
                Ok(Outcome::default())
            }
            Operation::LogoutFromGuest => {
                let vm = self.running_vm(target)?;
                vm.logged_in = None;
                Ok(Outcome::default())
            }
            Operation::RunProgramInGuest {
                program, options, ..
            } => self.launch(target, program, *options),
            Operation::RunScriptInGuest {
                interpreter,
                options,
                ..
            } => {
                let interpreter = interpreter.as_deref().unwrap_or(DEFAULT_INTERPRETER);
                self.launch(target, interpreter, *options)
            }
            Operation::KillProcessInGuest { pid } => {
                let vm = self.running_vm(target)?;
                let before = vm.processes.len();
                vm.processes.retain(|p| p.pid != *pid);
                if vm.processes.len() == before {
                    return Err(ErrorCode::NOT_FOUND);
                }
                Ok(Outcome::default())
            }
            Operation::ListProcessesInGuest => {
                let vm = self.running_vm(target)?;
                let rows = vm
                    .processes
                    .iter()
                    .map(|p| {
                        vec![
                            (
                                PropertyId::JOB_RESULT_ITEM_NAME,
                                PropertyValue::String(p.name.clone()),
                            ),
                            (
                                PropertyId::JOB_RESULT_PROCESS_ID,
                                PropertyValue::Int64(p.pid as i64),
                            ),
                            (
                                PropertyId::JOB_RESULT_PROCESS_OWNER,
                                PropertyValue::String(p.owner.clone()),
                            ),
                            (
                                PropertyId::JOB_RESULT_PROCESS_COMMAND,
                                PropertyValue::String(p.command.clone()),
                            ),
                            (
                                PropertyId::JOB_RESULT_PROCESS_BEING_DEBUGGED,
                                PropertyValue::Bool(p.being_debugged),
                            ),
                            (
                                PropertyId::JOB_RESULT_PROCESS_START_TIME,
                                PropertyValue::Int64(p.start_time),
                            ),
                        ]
                    })
                    .collect();
                Ok(Outcome::rows(rows))
            }
            Operation::ListDirectoryInGuest { path } => {
                let vm = self.running_vm(target)?;
                let entries = vm.directories.get(path).ok_or(ErrorCode::FILE_NOT_FOUND)?;
                let rows = entries
                    .iter()
                    .map(|e| {
                        vec![
                            (
                                PropertyId::JOB_RESULT_ITEM_NAME,
                                PropertyValue::String(e.name.clone()),
                            ),
                            (PropertyId::JOB_RESULT_FILE_SIZE, PropertyValue::Int64(e.size)),
                            (PropertyId::JOB_RESULT_FILE_FLAGS, PropertyValue::Integer(e.flags)),
                            (
                                PropertyId::JOB_RESULT_FILE_MOD_TIME,
                                PropertyValue::Int64(e.modified),
                            ),
                        ]
                    })
                    .collect();
                Ok(Outcome::rows(rows))
            }
            Operation::CreateSnapshot {
                name, description, ..
            } => {
                let vm = self.vm_index(target)?;
                let index = self.vms[vm].take_snapshot(
                    name.clone().unwrap_or_default(),
                    description.clone().unwrap_or_default(),
                );
                let snapshot = self.snapshot_handle(vm, index);
                Ok(Outcome::ok(vec![(
                    PropertyId::JOB_RESULT_HANDLE,
                    PropertyValue::Handle(snapshot),
                )]))
            }
            Operation::RevertToSnapshot { snapshot, .. } => {
                let vm = self.vm_index(target)?;
                let (owner, index) = self.snapshot_of(*snapshot)?;
                if owner != vm {
                    return Err(ErrorCode::INVALID_ARG);
                }
                let vm = &mut self.vms[vm];
                vm.current_snapshot = Some(index);
                vm.power_state = vm.snapshots[index].power_state;
                vm.logged_in = None;
                Ok(Outcome::default())
            }
            Operation::RemoveSnapshot { snapshot, options } => {
                let vm = self.vm_index(target)?;
                let (owner, index) = self.snapshot_of(*snapshot)?;
                if owner != vm {
                    return Err(ErrorCode::INVALID_ARG);
                }
                remove_snapshot(
                    &mut self.vms[vm],
                    index,
                    options & SNAPSHOT_REMOVE_CHILDREN != 0,
                );
                Ok(Outcome::default())
            }
            Operation::CloneVm {
                snapshot, dest_vmx, ..
            } => {
                let vm = self.vm_index(target)?;
                if *snapshot != RawHandle::INVALID && self.snapshot_of(*snapshot)?.0 != vm {
                    return Err(ErrorCode::INVALID_ARG);
                }
                if self.vms.iter().any(|v| !v.deleted && &v.vmx_path == dest_vmx) {
                    return Err(ErrorCode::FILE_ALREADY_EXISTS);
                }
                let copy = self.vms[vm].clone_to(dest_vmx);
                self.vms.push(copy);
                let index = self.vms.len() - 1;
                let clone = self.alloc(HandleType::Vm, Body::Vm(index));
                Ok(Outcome::ok(vec![(
                    PropertyId::JOB_RESULT_HANDLE,
                    PropertyValue::Handle(clone),
                )]))
            }
            Operation::DeleteVm { .. } => {
                let index = self.vm_index(target)?;
                let vm = &mut self.vms[index];
                if vm.is_on() {
                    return Err(ErrorCode::VM_IS_RUNNING);
                }
                vm.deleted = true;
                Ok(Outcome::default())
            }
            Operation::ReadVariable { var_type, name } => {
                let vm = self.variable_vm(target, *var_type)?;
                let value = vm
                    .variables
                    .get(&(*var_type, name.clone()))
                    .cloned()
                    .unwrap_or_default();
                Ok(Outcome::ok(vec![(
                    PropertyId::JOB_RESULT_VM_VARIABLESTRING,
                    PropertyValue::String(value),
                )]))
            }
            Operation::WriteVariable {
                var_type,
                name,
                value,
            } => {
                let vm = self.variable_vm(target, *var_type)?;
                vm.variables.insert((*var_type, name.clone()), value.clone());
                Ok(Outcome::default())
            }
            Operation::InstallTools { options } => {
                let vm = self.running_vm(target)?;
                vm.power_state |= power_state::TOOLS_RUNNING;
                let runtime = if options & install_tools::RETURN_IMMEDIATELY != 0 {
                    Duration::ZERO
                } else {
                    TOOLS_INSTALL_TIME
                };
                Ok(Outcome {
                    runtime,
                    ..Outcome::default()
                })
            }
            Operation::UpgradeVirtualHardware => {
                let index = self.vm_index(target)?;
                let vm = &mut self.vms[index];
                if vm.is_on() {
                    return Err(ErrorCode::VM_IS_RUNNING);
                }
                vm.hardware_version += 1;
                Ok(Outcome::default())
            }
            Operation::AddSharedFolder {
                name,
                host_path,
                flags,
            } => {
                let vm = self.running_vm(target)?;
                if vm.shared_folder_index(name).is_ok() {
                    return Err(ErrorCode::FILE_ALREADY_EXISTS);
                }
                vm.shared_folders.push(SimSharedFolder {
                    name: name.clone(),
                    host_path: host_path.clone(),
                    flags: *flags,
                });
                Ok(Outcome::default())
            }
            Operation::EnableSharedFolders { enabled } => {
                let vm = self.running_vm(target)?;
                vm.shared_folders_enabled = *enabled;
                Ok(Outcome::default())
            }
            Operation::GetNumSharedFolders => {
                let vm = self.running_vm(target)?;
                let count = i32::try_from(vm.shared_folders.len()).map_err(|_| ErrorCode::FAIL)?;
                Ok(Outcome::ok(vec![(
                    PropertyId::JOB_RESULT_SHARED_FOLDER_COUNT,
                    PropertyValue::Integer(count),
                )]))
            }
            Operation::GetSharedFolderState { index } => {
                let vm = self.running_vm(target)?;
                let folder = usize::try_from(*index)
                    .ok()
                    .and_then(|i| vm.shared_folders.get(i))
                    .ok_or(ErrorCode::INVALID_ARG)?;
                Ok(Outcome::rows(vec![vec![
                    (
                        PropertyId::JOB_RESULT_ITEM_NAME,
                        PropertyValue::String(folder.name.clone()),
                    ),
                    (
                        PropertyId::JOB_RESULT_SHARED_FOLDER_HOST,
                        PropertyValue::String(folder.host_path.clone()),
                    ),
                    (
                        PropertyId::JOB_RESULT_SHARED_FOLDER_FLAGS,
                        PropertyValue::Integer(folder.flags),
                    ),
                ]]))
            }
            Operation::RemoveSharedFolder { name } => {
                let vm = self.running_vm(target)?;
                let index = vm.shared_folder_index(name)?;
                vm.shared_folders.remove(index);
                Ok(Outcome::default())
            }
            Operation::SetSharedFolderState {
                name,
                host_path,
                flags,
            } => {
                let vm = self.running_vm(target)?;
                let index = vm.shared_folder_index(name)?;
                let folder = &mut vm.shared_folders[index];
                folder.host_path = host_path.clone();
                folder.flags = *flags;
                Ok(Outcome::default())
            }
        }
    }

    /// Guest-side namespaces need a running VM; the runtime config does not.
    fn variable_vm(&mut self, target: RawHandle, var_type: i32) -> Result<&mut SimVm, ErrorCode> {
        if var_type == variable_type::CONFIG_RUNTIME_ONLY {
            let index = self.vm_index(target)?;
            Ok(&mut self.vms[index])
        } else {
            self.running_vm(target)
        }
    }

    fn launch(&mut self, target: RawHandle, path: &str, options: i32) -> Result<Outcome, ErrorCode> {
        let next_pid = self.next_pid;
        let vm = self.running_vm(target)?;
        let program = vm
            .programs
            .get(path)
            .cloned()
            .ok_or(ErrorCode::FILE_NOT_FOUND)?;
        let pid = match program.pid {
            Some(pid) => pid,
            None => {
                self.next_pid += 1;
                next_pid
            }
        };

        let (exit_code, elapsed, runtime) = if options & run_program::RETURN_IMMEDIATELY != 0 {
            (0, 0, Duration::ZERO)
        } else {
            (program.exit_code, program.elapsed, program.runtime)
        };
        Ok(Outcome {
            results: process_results(pid, exit_code, elapsed),
            runtime,
            program: Some(SimProgram {
                pid: Some(pid),
                ..program
            }),
            ..Outcome::default()
        })
    }
}

fn process_results(pid: u64, exit_code: i32, elapsed: i32) -> Props {
    vec![
        (
            PropertyId::JOB_RESULT_PROCESS_ID,
            PropertyValue::Int64(pid as i64),
        ),
        (
            PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
            PropertyValue::Integer(exit_code),
        ),
        (
            PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME,
            PropertyValue::Integer(elapsed),
        ),
    ]
}

fn remove_snapshot(vm: &mut SimVm, index: usize, with_children: bool) {
    let parent = vm.snapshots[index].parent;
    vm.snapshots[index].removed = true;
    for child in vm.live_snapshots(Some(index)) {
        if with_children {
            remove_snapshot(vm, child, true);
        } else {
            vm.snapshots[child].parent = parent;
        }
    }
    if vm.current_snapshot == Some(index) {
        vm.current_snapshot = parent;
    }
}

fn lookup(props: &Props, ids: &[PropertyId]) -> NativeResult<Vec<PropertyValue>> {
    ids.iter()
        .map(|id| {
            props
                .iter()
                .find(|(p, _)| p == id)
                .map(|(_, v)| v.clone())
                .ok_or(ErrorCode::INVALID_ARG)
        })
        .collect()
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SimState>,
    changed: Condvar,
}

impl Shared {
    fn finish(&self, job: RawHandle, error: ErrorCode, results: Props, rows: Vec<Props>) {
        let mut state = self.state.lock();
        if let Some(SimObject {
            body: Body::Job(j), ..
        }) = state.objects.get_mut(&job)
        {
            j.done = true;
            j.error = error;
            j.results = results;
            j.rows = rows;
        }
        drop(state);
        self.changed.notify_all();
    }

    fn release(&self, raw: RawHandle) {
        self.state.lock().release(raw);
    }

    /// Deliver the events of a finished, subscribed job. Runs without the
    /// lock held; the job carries a reference owned by this thread.
    fn dispatch(&self, job: RawHandle, program: Option<SimProgram>, events: Subscription) {
        let program = program.unwrap_or_else(|| SimProgram::new(0));
        if let Some(stray) = program.stray_event {
            events.deliver(job, stray);
        }
        events.deliver(job, EventType::JOB_PROGRESS);

        if program.lost_completion {
            tracing::debug!(job = %job, token = %events.token, "Dropping completion event");
        } else if let Some(pid) = program.completion_pid {
            let alias = self.state.lock().alloc_job(SimJob {
                done: true,
                error: ErrorCode::OK,
                results: process_results(pid, program.exit_code, program.elapsed),
                rows: Vec::new(),
            });
            events.deliver(alias, EventType::JOB_COMPLETED);
            self.release(alias);
        } else {
            events.deliver(job, EventType::JOB_COMPLETED);
        }
        self.release(job);
    }
}

/// An in-process VIX runtime.
#[derive(Debug)]
pub struct SimRuntime {
    shared: Arc<Shared>,
    latency: Duration,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    pub fn new() -> Self {
        Self::with_latency(DEFAULT_LATENCY)
    }

    /// A runtime whose jobs take `latency` to complete.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    next_handle: 1,
                    next_pid: FIRST_PID,
                    objects: HashMap::new(),
                    vms: Vec::new(),
                    double_releases: 0,
                }),
                changed: Condvar::new(),
            }),
            latency,
        }
    }

    /// Make a VM available to `OpenVm` by its vmx path.
    pub fn install_vm(&self, vm: SimVm) {
        self.shared.state.lock().vms.push(vm);
    }

    /// Install a VM and return an owned handle to it.
    pub fn add_vm(&self, vm: SimVm) -> RawHandle {
        let mut state = self.shared.state.lock();
        state.vms.push(vm);
        let index = state.vms.len() - 1;
        state.alloc(HandleType::Vm, Body::Vm(index))
    }

    /// A finished job with the given result properties.
    pub fn completed_job(&self, results: Props) -> RawHandle {
        self.shared.state.lock().alloc_job(SimJob {
            done: true,
            error: ErrorCode::OK,
            results,
            rows: Vec::new(),
        })
    }

    /// A finished list-type job with the given rows.
    pub fn completed_list_job(&self, rows: Vec<Props>) -> RawHandle {
        self.shared.state.lock().alloc_job(SimJob {
            done: true,
            error: ErrorCode::OK,
            results: Vec::new(),
            rows,
        })
    }

    /// A finished job that failed with `error`.
    pub fn failed_job(&self, error: ErrorCode) -> RawHandle {
        self.shared.state.lock().alloc_job(SimJob {
            done: true,
            error,
            results: Vec::new(),
            rows: Vec::new(),
        })
    }

    /// A job that stays pending until [`SimRuntime::finish_job`].
    pub fn pending_job(&self) -> RawHandle {
        self.shared.state.lock().alloc_job(SimJob {
            done: false,
            error: ErrorCode::OK,
            results: Vec::new(),
            rows: Vec::new(),
        })
    }

    pub fn finish_job(&self, job: RawHandle, results: Props) {
        self.shared.finish(job, ErrorCode::OK, results, Vec::new());
    }

    /// Current reference count of `raw`; 0 once freed.
    pub fn refcount(&self, raw: RawHandle) -> u32 {
        self.shared
            .state
            .lock()
            .objects
            .get(&raw)
            .map_or(0, |o| o.refs)
    }

    /// Number of handles still allocated.
    pub fn live_handles(&self) -> usize {
        self.shared.state.lock().objects.len()
    }

    /// Number of releases of already freed handles.
    pub fn double_releases(&self) -> usize {
        self.shared.state.lock().double_releases
    }

    /// Power state bits of the VM installed at `vmx_path`.
    pub fn power_state_of(&self, vmx_path: &str) -> Option<i32> {
        self.with_vm(vmx_path, |vm| vm.power_state)
    }

    fn with_vm<T>(&self, vmx_path: &str, f: impl FnOnce(&SimVm) -> T) -> Option<T> {
        self.shared
            .state
            .lock()
            .vms
            .iter()
            .find(|vm| !vm.deleted && vm.vmx_path == vmx_path)
            .map(f)
    }

    /// Whether a VM exists at `vmx_path`.
    pub fn has_vm(&self, vmx_path: &str) -> bool {
        self.with_vm(vmx_path, |_| ()).is_some()
    }

    pub fn hardware_version_of(&self, vmx_path: &str) -> Option<i32> {
        self.with_vm(vmx_path, |vm| vm.hardware_version)
    }

    pub fn shared_folders_enabled(&self, vmx_path: &str) -> Option<bool> {
        self.with_vm(vmx_path, |vm| vm.shared_folders_enabled)
    }

    /// Guest user logged in to the VM installed at `vmx_path`.
    pub fn logged_in_user(&self, vmx_path: &str) -> Option<String> {
        self.with_vm(vmx_path, |vm| vm.logged_in.clone()).flatten()
    }
}

impl NativeApi for SimRuntime {
    fn handle_type(&self, handle: RawHandle) -> HandleType {
        self.shared
            .state
            .lock()
            .objects
            .get(&handle)
            .map_or(HandleType::None, |o| o.kind)
    }

    fn add_ref(&self, handle: RawHandle) {
        if let Some(object) = self.shared.state.lock().objects.get_mut(&handle) {
            object.refs += 1;
        }
    }

    fn release(&self, handle: RawHandle) {
        self.shared.release(handle);
    }

    fn get_properties(
        &self,
        handle: RawHandle,
        ids: &[PropertyId],
    ) -> NativeResult<Vec<PropertyValue>> {
        let state = self.shared.state.lock();
        let object = state
            .objects
            .get(&handle)
            .ok_or(ErrorCode::INVALID_HANDLE)?;
        match &object.body {
            Body::Job(job) if !job.done => Err(ErrorCode::OBJECT_IS_BUSY),
            Body::Job(job) if !job.error.is_ok() => Err(job.error),
            Body::Job(job) => lookup(&job.results, ids),
            Body::Vm(index) => {
                let vm = &state.vms[*index];
                ids.iter()
                    .map(|id| vm.property(*id).ok_or(ErrorCode::INVALID_ARG))
                    .collect()
            }
            Body::Snapshot { vm, index } => {
                let snapshot = &state.vms[*vm].snapshots[*index];
                ids.iter()
                    .map(|id| match *id {
                        PropertyId::SNAPSHOT_DISPLAYNAME => {
                            Ok(PropertyValue::String(snapshot.name.clone()))
                        }
                        PropertyId::SNAPSHOT_DESCRIPTION => {
                            Ok(PropertyValue::String(snapshot.description.clone()))
                        }
                        PropertyId::SNAPSHOT_POWERSTATE => {
                            Ok(PropertyValue::Integer(snapshot.power_state))
                        }
                        _ => Err(ErrorCode::INVALID_ARG),
                    })
                    .collect()
            }
            Body::Host => ids
                .iter()
                .map(|id| match *id {
                    PropertyId::HOST_HOSTTYPE => Ok(PropertyValue::Integer(3)),
                    PropertyId::HOST_API_VERSION => Ok(PropertyValue::Integer(1)),
                    _ => Err(ErrorCode::INVALID_ARG),
                })
                .collect(),
        }
    }

    fn issue(
        &self,
        target: RawHandle,
        op: &Operation,
        events: Option<Subscription>,
    ) -> NativeResult<RawHandle> {
        // Same argument check the library binding does when building C strings
        if op.strings().iter().any(|s| s.contains('\0')) {
            tracing::error!(op = op.name(), "Operation not started");
            return Err(ErrorCode::INVALID_ARG);
        }
        let mut state = self.shared.state.lock();
        let outcome = state.run(target, op);
        let job = state.alloc_job(SimJob {
            done: false,
            error: ErrorCode::OK,
            results: Vec::new(),
            rows: Vec::new(),
        });
        if events.is_some() {
            // Held by the completion thread until its events are delivered
            if let Some(object) = state.objects.get_mut(&job) {
                object.refs += 1;
            }
        }
        drop(state);

        tracing::trace!(job = %job, op = op.name(), error = %outcome.error, "Simulated job issued");

        let shared = Arc::clone(&self.shared);
        let delay = self.latency + outcome.runtime;
        thread::spawn(move || {
            thread::sleep(delay);
            shared.finish(job, outcome.error, outcome.results, outcome.rows);
            if let Some(events) = events {
                shared.dispatch(job, outcome.program, events);
            }
        });
        Ok(job)
    }

    fn derive(&self, parent: RawHandle, derivation: &Derivation) -> NativeResult<RawHandle> {
        let mut state = self.shared.state.lock();
        let (vm, index) = match derivation {
            Derivation::CurrentSnapshot => {
                let vm = state.vm_index(parent)?;
                let index = state.vms[vm]
                    .current_snapshot
                    .ok_or(ErrorCode::NOT_FOUND)?;
                (vm, index)
            }
            Derivation::NamedSnapshot(name) => {
                let vm = state.vm_index(parent)?;
                let index = state.vms[vm]
                    .snapshots
                    .iter()
                    .position(|s| !s.removed && &s.name == name)
                    .ok_or(ErrorCode::NOT_FOUND)?;
                (vm, index)
            }
            Derivation::RootSnapshot(n) => {
                let vm = state.vm_index(parent)?;
                let index = *state.vms[vm]
                    .live_snapshots(None)
                    .get(*n)
                    .ok_or(ErrorCode::INVALID_ARG)?;
                (vm, index)
            }
            Derivation::SnapshotChild(n) => {
                let (vm, snapshot) = state.snapshot_of(parent)?;
                let index = *state.vms[vm]
                    .live_snapshots(Some(snapshot))
                    .get(*n)
                    .ok_or(ErrorCode::INVALID_ARG)?;
                (vm, index)
            }
            Derivation::SnapshotParent => {
                let (vm, snapshot) = state.snapshot_of(parent)?;
                let index = state.vms[vm].snapshots[snapshot]
                    .parent
                    .ok_or(ErrorCode::NOT_FOUND)?;
                (vm, index)
            }
        };
        Ok(state.snapshot_handle(vm, index))
    }

    fn count(&self, handle: RawHandle, what: Countable) -> NativeResult<usize> {
        let state = self.shared.state.lock();
        match what {
            Countable::RootSnapshots => {
                let vm = state.vm_index(handle)?;
                Ok(state.vms[vm].live_snapshots(None).len())
            }
            Countable::SnapshotChildren => {
                let (vm, index) = state.snapshot_of(handle)?;
                Ok(state.vms[vm].live_snapshots(Some(index)).len())
            }
        }
    }

    fn job_wait(&self, job: RawHandle, ids: &[PropertyId]) -> NativeResult<Vec<PropertyValue>> {
        let mut state = self.shared.state.lock();
        loop {
            match state.objects.get(&job).map(|o| &o.body) {
                Some(Body::Job(j)) if j.done => {
                    if !j.error.is_ok() {
                        return Err(j.error);
                    }
                    return lookup(&j.results, ids);
                }
                Some(Body::Job(_)) => {}
                Some(_) => return Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
                None => return Err(ErrorCode::INVALID_HANDLE),
            }
            self.shared.changed.wait(&mut state);
        }
    }

    fn job_check_completion(&self, job: RawHandle) -> NativeResult<bool> {
        match self.shared.state.lock().objects.get(&job).map(|o| &o.body) {
            Some(Body::Job(j)) => Ok(j.done),
            Some(_) => Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(ErrorCode::INVALID_HANDLE),
        }
    }

    fn job_error(&self, job: RawHandle) -> ErrorCode {
        match self.shared.state.lock().objects.get(&job).map(|o| &o.body) {
            Some(Body::Job(j)) if j.done => j.error,
            Some(Body::Job(_)) => ErrorCode::OK,
            Some(_) => ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE,
            None => ErrorCode::INVALID_HANDLE,
        }
    }

    fn job_num_rows(&self, job: RawHandle, id: PropertyId) -> usize {
        match self.shared.state.lock().objects.get(&job).map(|o| &o.body) {
            Some(Body::Job(j)) => j
                .rows
                .iter()
                .filter(|row| row.iter().any(|(p, _)| *p == id))
                .count(),
            _ => 0,
        }
    }

    fn job_nth_row(
        &self,
        job: RawHandle,
        index: usize,
        ids: &[PropertyId],
    ) -> NativeResult<Vec<PropertyValue>> {
        match self.shared.state.lock().objects.get(&job).map(|o| &o.body) {
            Some(Body::Job(j)) => {
                let row = j.rows.get(index).ok_or(ErrorCode::INVALID_ARG)?;
                lookup(row, ids)
            }
            Some(_) => Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(ErrorCode::INVALID_HANDLE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_done(sim: &SimRuntime, job: RawHandle) -> NativeResult<Vec<PropertyValue>> {
        sim.job_wait(job, &[])
    }

    fn open(sim: &SimRuntime, vmx: &str) -> RawHandle {
        let connect = sim.issue(
            RawHandle::INVALID,
            &Operation::Connect {
                provider: crate::native::ServiceProvider::Workstation,
                host: None,
                port: 0,
                user: None,
                password: None,
            },
            None,
        ).unwrap();
        let host = sim.job_wait(connect, &[PropertyId::JOB_RESULT_HANDLE]).unwrap()[0]
            .as_handle(PropertyId::JOB_RESULT_HANDLE)
            .unwrap();
        sim.release(connect);
        let job = sim.issue(
            host,
            &Operation::OpenVm {
                vmx_path: vmx.into(),
            },
            None,
        ).unwrap();
        let vm = sim.job_wait(job, &[PropertyId::JOB_RESULT_HANDLE]).unwrap()[0]
            .as_handle(PropertyId::JOB_RESULT_HANDLE)
            .unwrap();
        sim.release(job);
        sim.release(host);
        vm
    }

    #[test]
    fn test_refcounting() {
        let sim = SimRuntime::new();
        let job = sim.completed_job(vec![]);
        sim.add_ref(job);
        assert_eq!(sim.refcount(job), 2);
        sim.release(job);
        sim.release(job);
        assert_eq!(sim.refcount(job), 0);
        sim.release(job);
        assert_eq!(sim.double_releases(), 1);
        assert_eq!(sim.handle_type(job), HandleType::None);
    }

    #[test]
    fn test_open_vm_requires_host() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(SimVm::new("/vms/a.vmx"));
        let job = sim.issue(
            vm,
            &Operation::OpenVm {
                vmx_path: "/vms/b.vmx".into(),
            },
            None,
        ).unwrap();
        assert_eq!(
            wait_done(&sim, job),
            Err(ErrorCode::NOT_SUPPORTED_ON_HANDLE_TYPE)
        );
    }

    #[test]
    fn test_power_cycle() {
        let sim = SimRuntime::new();
        sim.install_vm(SimVm::new("/vms/a.vmx"));
        let vm = open(&sim, "/vms/a.vmx");
        assert_eq!(sim.handle_type(vm), HandleType::Vm);

        let job = sim.issue(vm, &Operation::Pause, None).unwrap();
        assert_eq!(wait_done(&sim, job), Err(ErrorCode::VM_NOT_RUNNING));

        let job = sim.issue(vm, &Operation::PowerOn { options: 0 }, None).unwrap();
        wait_done(&sim, job).unwrap();
        assert_eq!(
            sim.get_properties(vm, &[PropertyId::VM_IS_RUNNING]).unwrap(),
            vec![PropertyValue::Bool(true)]
        );
        assert_eq!(
            sim.get_properties(vm, &[PropertyId::VM_NAME]).unwrap(),
            vec![PropertyValue::String("a".into())]
        );
    }

    #[test]
    fn test_run_program_reports_results() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(
            SimVm::new("/vms/a.vmx")
                .powered_on()
                .program("/bin/true", SimProgram::new(0).pid(42).elapsed(7)),
        );
        let job = sim.issue(
            vm,
            &Operation::RunProgramInGuest {
                program: "/bin/true".into(),
                args: None,
                options: 0,
            },
            None,
        ).unwrap();
        let values = sim
            .job_wait(
                job,
                &[
                    PropertyId::JOB_RESULT_PROCESS_ID,
                    PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME,
                ],
            )
            .unwrap();
        assert_eq!(values, vec![PropertyValue::Int64(42), PropertyValue::Integer(7)]);
    }

    #[test]
    fn test_unknown_program_fails() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(SimVm::new("/vms/a.vmx").powered_on());
        let job = sim.issue(
            vm,
            &Operation::RunProgramInGuest {
                program: "/bin/nope".into(),
                args: None,
                options: 0,
            },
            None,
        ).unwrap();
        assert_eq!(wait_done(&sim, job), Err(ErrorCode::FILE_NOT_FOUND));
    }

    #[test]
    fn test_pids_are_allocated_sequentially() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(
            SimVm::new("/vms/a.vmx")
                .powered_on()
                .program("/bin/true", SimProgram::new(0)),
        );
        let run = Operation::RunProgramInGuest {
            program: "/bin/true".into(),
            args: None,
            options: run_program::RETURN_IMMEDIATELY,
        };
        let pids: Vec<PropertyValue> = (0..2)
            .map(|_| {
                let job = sim.issue(vm, &run, None).unwrap();
                sim.job_wait(job, &[PropertyId::JOB_RESULT_PROCESS_ID]).unwrap()[0].clone()
            })
            .collect();
        assert_eq!(
            pids,
            vec![
                PropertyValue::Int64(FIRST_PID as i64),
                PropertyValue::Int64(FIRST_PID as i64 + 1)
            ]
        );
    }

    #[test]
    fn test_snapshot_tree() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(
            SimVm::new("/vms/a.vmx")
                .snapshot("base", "clean install")
                .snapshot("patched", ""),
        );
        assert_eq!(sim.count(vm, Countable::RootSnapshots), Ok(1));

        let current = sim.derive(vm, &Derivation::CurrentSnapshot).unwrap();
        assert_eq!(
            sim.get_properties(current, &[PropertyId::SNAPSHOT_DISPLAYNAME]).unwrap(),
            vec![PropertyValue::String("patched".into())]
        );
        let parent = sim.derive(current, &Derivation::SnapshotParent).unwrap();
        assert_eq!(sim.count(parent, Countable::SnapshotChildren), Ok(1));
        assert_eq!(
            sim.derive(parent, &Derivation::SnapshotParent),
            Err(ErrorCode::NOT_FOUND)
        );

        let job = sim.issue(
            vm,
            &Operation::RemoveSnapshot {
                snapshot: current,
                options: 0,
            },
            None,
        ).unwrap();
        wait_done(&sim, job).unwrap();
        assert_eq!(sim.count(parent, Countable::SnapshotChildren), Ok(0));
        let current = sim.derive(vm, &Derivation::CurrentSnapshot).unwrap();
        assert_eq!(
            sim.get_properties(current, &[PropertyId::SNAPSHOT_DESCRIPTION]).unwrap(),
            vec![PropertyValue::String("clean install".into())]
        );
    }

    #[test]
    fn test_list_rows() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(
            SimVm::new("/vms/a.vmx")
                .powered_on()
                .directory("/tmp", vec![SimFile::file("a.txt", 3, 0), SimFile::dir("d", 0)]),
        );
        let job = sim.issue(
            vm,
            &Operation::ListDirectoryInGuest {
                path: "/tmp".into(),
            },
            None,
        ).unwrap();
        wait_done(&sim, job).unwrap();
        assert_eq!(sim.job_num_rows(job, PropertyId::JOB_RESULT_ITEM_NAME), 2);
        assert_eq!(
            sim.job_nth_row(job, 1, &[PropertyId::JOB_RESULT_FILE_FLAGS]).unwrap(),
            vec![PropertyValue::Integer(file_attributes::DIRECTORY)]
        );
        assert_eq!(
            sim.job_nth_row(job, 2, &[PropertyId::JOB_RESULT_ITEM_NAME]),
            Err(ErrorCode::INVALID_ARG)
        );
    }

    #[test]
    fn test_interior_nul_is_rejected_before_a_job_exists() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(SimVm::new("/vms/a.vmx").powered_on());
        let before = sim.live_handles();
        let issued = sim.issue(
            vm,
            &Operation::ListDirectoryInGuest {
                path: "/tmp\0/etc".into(),
            },
            None,
        );
        assert_eq!(issued, Err(ErrorCode::INVALID_ARG));
        assert_eq!(sim.live_handles(), before);
    }

    #[test]
    fn test_clone_and_delete() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(SimVm::new("/vms/a.vmx").snapshot("base", ""));
        let base = sim.derive(vm, &Derivation::CurrentSnapshot).unwrap();
        let clone = Operation::CloneVm {
            snapshot: base,
            clone_type: crate::native::clone_type::LINKED,
            dest_vmx: "/vms/b.vmx".into(),
        };
        let job = sim.issue(vm, &clone, None).unwrap();
        let copy = sim.job_wait(job, &[PropertyId::JOB_RESULT_HANDLE]).unwrap()[0]
            .as_handle(PropertyId::JOB_RESULT_HANDLE)
            .unwrap();
        assert_eq!(sim.handle_type(copy), HandleType::Vm);
        assert_eq!(sim.count(copy, Countable::RootSnapshots), Ok(0));

        let job = sim.issue(vm, &clone, None).unwrap();
        assert_eq!(wait_done(&sim, job), Err(ErrorCode::FILE_ALREADY_EXISTS));

        let job = sim.issue(copy, &Operation::DeleteVm { options: 0 }, None).unwrap();
        wait_done(&sim, job).unwrap();
        assert!(!sim.has_vm("/vms/b.vmx"));
        let job = sim.issue(copy, &Operation::PowerOn { options: 0 }, None).unwrap();
        assert_eq!(wait_done(&sim, job), Err(ErrorCode::FILE_NOT_FOUND));
    }

    #[test]
    fn test_shared_folder_state_is_a_single_row() {
        let sim = SimRuntime::new();
        let vm = sim.add_vm(SimVm::new("/vms/a.vmx").powered_on().shared_folder(
            SimSharedFolder {
                name: "src".into(),
                host_path: "/home/me/src".into(),
                flags: 0,
            },
        ));
        let job = sim
            .issue(vm, &Operation::GetSharedFolderState { index: 0 }, None)
            .unwrap();
        wait_done(&sim, job).unwrap();
        assert_eq!(sim.job_num_rows(job, PropertyId::JOB_RESULT_ITEM_NAME), 1);
        assert_eq!(
            sim.job_nth_row(job, 0, &[PropertyId::JOB_RESULT_SHARED_FOLDER_HOST]).unwrap(),
            vec![PropertyValue::String("/home/me/src".into())]
        );

        let job = sim
            .issue(vm, &Operation::GetSharedFolderState { index: 1 }, None)
            .unwrap();
        assert_eq!(wait_done(&sim, job), Err(ErrorCode::INVALID_ARG));
    }
}
