//! VirtualMachine type - VM lifecycle, guest operations and snapshots.

use crate::error::{Result, VmError};
use crate::guest::{DirectoryEntry, ProcessListEntry, DIRECTORY_ROW, PROCESS_ROW};
use crate::power::{PowerState, ToolsState};
use crate::shared_folder::{share_flags, SharedFolder, SHARED_FOLDER_ROW};
use crate::snapshot::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use vix_core::native::{
    clone_type, install_tools, power_op, run_program, variable_type,
    LOGIN_REQUIRE_INTERACTIVE_ENVIRONMENT, SNAPSHOT_INCLUDE_MEMORY, SNAPSHOT_REMOVE_CHILDREN,
    VMDELETE_DISK_FILES,
};
use vix_core::{
    Countable, Derivation, HandleRef, HandleType, Operation, Process, PropertyId, PropertyValue,
    RawHandle, Session,
};

/// Namespace of a VM variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    /// Guest variable, visible to tools in the guest.
    Guest,
    /// `.vmx` setting that lasts until the VM powers off.
    ConfigRuntime,
    /// Guest OS environment variable.
    GuestEnvironment,
}

impl VariableType {
    fn raw(self) -> i32 {
        match self {
            VariableType::Guest => variable_type::GUEST_VARIABLE,
            VariableType::ConfigRuntime => variable_type::CONFIG_RUNTIME_ONLY,
            VariableType::GuestEnvironment => variable_type::GUEST_ENVIRONMENT_VARIABLE,
        }
    }
}

/// An open virtual machine.
///
/// Holds a reference to the host connection it was opened through.
#[derive(Debug)]
pub struct VirtualMachine {
    session: Session,
    handle: HandleRef,
    _host: Option<Arc<HandleRef>>,
}

impl VirtualMachine {
    /// Wrap an owned VM handle.
    pub fn from_handle(session: Session, handle: HandleRef) -> Result<Self> {
        let actual = handle.handle_type()?;
        if actual != HandleType::Vm {
            return Err(vix_core::VixError::TypeMismatch {
                expected: HandleType::Vm,
                actual,
            }
            .into());
        }
        Ok(Self {
            session,
            handle,
            _host: None,
        })
    }

    pub(crate) fn with_host(session: Session, handle: HandleRef, host: Arc<HandleRef>) -> Self {
        Self {
            session,
            handle,
            _host: Some(host),
        }
    }

    pub fn handle(&self) -> &HandleRef {
        &self.handle
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn property(&self, id: PropertyId) -> Result<PropertyValue> {
        Ok(self.handle.get_property(id)?)
    }

    fn string_property(&self, id: PropertyId) -> Result<String> {
        Ok(self.property(id)?.into_string(id)?)
    }

    pub fn name(&self) -> Result<String> {
        self.string_property(PropertyId::VM_NAME)
    }

    pub fn vmx_path(&self) -> Result<String> {
        self.string_property(PropertyId::VM_VMX_PATHNAME)
    }

    pub fn guest_os(&self) -> Result<String> {
        self.string_property(PropertyId::VM_GUESTOS)
    }

    pub fn num_vcpus(&self) -> Result<i32> {
        Ok(self
            .property(PropertyId::VM_NUM_VCPUS)?
            .as_i32(PropertyId::VM_NUM_VCPUS)?)
    }

    pub fn memory_mib(&self) -> Result<i32> {
        Ok(self
            .property(PropertyId::VM_MEMORY_SIZE)?
            .as_i32(PropertyId::VM_MEMORY_SIZE)?)
    }

    pub fn power_state(&self) -> Result<PowerState> {
        let raw = self
            .property(PropertyId::VM_POWER_STATE)?
            .as_i32(PropertyId::VM_POWER_STATE)?;
        Ok(PowerState(raw))
    }

    pub fn tools_state(&self) -> Result<ToolsState> {
        let raw = self
            .property(PropertyId::VM_TOOLS_STATE)?
            .as_i32(PropertyId::VM_TOOLS_STATE)?;
        Ok(ToolsState::from_raw(raw))
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self
            .property(PropertyId::VM_IS_RUNNING)?
            .as_bool(PropertyId::VM_IS_RUNNING)?)
    }

    /// Issue `op` and await the job.
    async fn run_job(&self, op: Operation) -> Result<()> {
        let job = self.session.issue(&self.handle, &op)?;
        self.session.waiter(job).wait().await?;
        Ok(())
    }

    /// Power on. With `launch_gui`, opens the VM in the product UI.
    pub async fn power_on(&self, launch_gui: bool) -> Result<()> {
        let options = if launch_gui {
            power_op::LAUNCH_GUI
        } else {
            power_op::NORMAL
        };
        tracing::info!(vm = %self.handle.raw()?, launch_gui, "Powering on VM");
        self.run_job(Operation::PowerOn { options }).await
    }

    /// Power off. With `from_guest`, asks the guest OS to shut down.
    pub async fn power_off(&self, from_guest: bool) -> Result<()> {
        let options = if from_guest {
            power_op::FROM_GUEST
        } else {
            power_op::NORMAL
        };
        tracing::info!(vm = %self.handle.raw()?, from_guest, "Powering off VM");
        self.run_job(Operation::PowerOff { options }).await
    }

    pub async fn reset(&self, from_guest: bool) -> Result<()> {
        let options = if from_guest {
            power_op::FROM_GUEST
        } else {
            power_op::NORMAL
        };
        tracing::info!(vm = %self.handle.raw()?, from_guest, "Resetting VM");
        self.run_job(Operation::Reset { options }).await
    }

    pub async fn suspend(&self) -> Result<()> {
        tracing::info!(vm = %self.handle.raw()?, "Suspending VM");
        self.run_job(Operation::Suspend).await
    }

    pub async fn pause(&self) -> Result<()> {
        tracing::info!(vm = %self.handle.raw()?, "Pausing VM");
        self.run_job(Operation::Pause).await
    }

    pub async fn unpause(&self) -> Result<()> {
        tracing::info!(vm = %self.handle.raw()?, "Unpausing VM");
        self.run_job(Operation::Unpause).await
    }

    /// Wait until VMware Tools is running in the guest. `None` waits as long
    /// as the host allows.
    pub async fn wait_for_tools(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout_secs = match timeout {
            Some(t) => i32::try_from(t.as_secs())
                .map_err(|_| VmError::InvalidArgument(format!("tools timeout {t:?}")))?,
            None => 0,
        };
        self.run_job(Operation::WaitForTools { timeout_secs }).await
    }

    /// Authenticate guest operations.
    pub async fn login(&self, user: &str, password: &str, require_interactive: bool) -> Result<()> {
        let options = if require_interactive {
            LOGIN_REQUIRE_INTERACTIVE_ENVIRONMENT
        } else {
            0
        };
        tracing::debug!(vm = %self.handle.raw()?, user, "Logging in to guest");
        self.run_job(Operation::LoginInGuest {
            user: user.to_string(),
            password: password.to_string(),
            options,
        })
        .await
    }

    pub async fn logout(&self) -> Result<()> {
        self.run_job(Operation::LogoutFromGuest).await
    }

    /// Launch a tracked guest process and await it.
    async fn launch(&self, op: Operation, should_block: bool) -> Result<Process> {
        let (job, record) = self.session.issue_tracked(&self.handle, &op)?;
        let process = self
            .session
            .waiter(job)
            .with_record(record)
            .process(should_block)
            .await?;
        tracing::info!(
            pid = process.pid,
            exit_code = ?process.exit_code,
            should_block,
            "Guest program returned"
        );
        Ok(process)
    }

    /// Run a program in the guest.
    ///
    /// With `should_block`, waits for the program to exit and returns its
    /// exit code and elapsed time; otherwise returns as soon as the guest
    /// reports a pid, with both left unset.
    pub async fn proc_run(
        &self,
        program: &str,
        args: Option<&str>,
        should_block: bool,
    ) -> Result<Process> {
        if program.is_empty() {
            return Err(VmError::InvalidArgument("program path is empty".into()));
        }
        let op = Operation::RunProgramInGuest {
            program: program.to_string(),
            args: args.map(str::to_string),
            options: launch_options(should_block),
        };
        self.launch(op, should_block).await
    }

    /// Run script text with `interpreter` (the guest default when `None`).
    pub async fn run_script(
        &self,
        interpreter: Option<&str>,
        script: &str,
        should_block: bool,
    ) -> Result<Process> {
        let op = Operation::RunScriptInGuest {
            interpreter: interpreter.map(str::to_string),
            script: script.to_string(),
            options: launch_options(should_block),
        };
        self.launch(op, should_block).await
    }

    pub async fn proc_kill(&self, pid: u64) -> Result<()> {
        tracing::debug!(vm = %self.handle.raw()?, pid, "Killing guest process");
        self.run_job(Operation::KillProcessInGuest { pid }).await
    }

    /// List guest processes in the order the guest reports them.
    pub async fn proc_list(&self) -> Result<Vec<ProcessListEntry>> {
        let job = self
            .session
            .issue(&self.handle, &Operation::ListProcessesInGuest)?;
        let rows = self.session.waiter(job).rows(&PROCESS_ROW).await?;
        rows.into_iter().map(ProcessListEntry::from_row).collect()
    }

    /// List a guest directory in the order the guest reports it.
    pub async fn dir_list(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        if path.is_empty() {
            return Err(VmError::InvalidArgument("directory path is empty".into()));
        }
        let op = Operation::ListDirectoryInGuest {
            path: path.to_string(),
        };
        let job = self.session.issue(&self.handle, &op)?;
        let rows = self.session.waiter(job).rows(&DIRECTORY_ROW).await?;
        rows.into_iter().map(DirectoryEntry::from_row).collect()
    }

    pub fn num_root_snapshots(&self) -> Result<usize> {
        Ok(self
            .handle
            .api()
            .count(self.handle.raw()?, Countable::RootSnapshots)
            .map_err(vix_core::VixError::from)?)
    }

    pub fn root_snapshot(&self, index: usize) -> Result<Snapshot> {
        Snapshot::derive(&self.handle, Derivation::RootSnapshot(index))
    }

    pub fn current_snapshot(&self) -> Result<Snapshot> {
        Snapshot::derive(&self.handle, Derivation::CurrentSnapshot)
    }

    pub fn named_snapshot(&self, name: &str) -> Result<Snapshot> {
        Snapshot::derive(&self.handle, Derivation::NamedSnapshot(name.to_string()))
    }

    pub async fn create_snapshot(
        &self,
        name: Option<&str>,
        description: Option<&str>,
        include_memory: bool,
    ) -> Result<Snapshot> {
        let op = Operation::CreateSnapshot {
            name: name.map(str::to_string),
            description: description.map(str::to_string),
            options: if include_memory {
                SNAPSHOT_INCLUDE_MEMORY
            } else {
                0
            },
        };
        let job = self.session.issue(&self.handle, &op)?;
        let handle = self
            .session
            .waiter(job)
            .result_handle(HandleType::Snapshot)
            .await?;
        tracing::info!(vm = %self.handle.raw()?, snapshot = %handle.raw()?, ?name, "Created snapshot");
        Ok(Snapshot::new(handle))
    }

    /// Revert to `snapshot`. With `suppress_power_on`, a snapshot taken while
    /// running is restored powered off.
    pub async fn revert_to_snapshot(
        &self,
        snapshot: &Snapshot,
        suppress_power_on: bool,
    ) -> Result<()> {
        let options = if suppress_power_on {
            power_op::SUPPRESS_SNAPSHOT_POWERON
        } else {
            power_op::NORMAL
        };
        self.run_job(Operation::RevertToSnapshot {
            snapshot: snapshot.handle().raw()?,
            options,
        })
        .await
    }

    /// Delete `snapshot`, optionally with all of its descendants.
    pub async fn remove_snapshot(&self, snapshot: Snapshot, remove_children: bool) -> Result<()> {
        let options = if remove_children {
            SNAPSHOT_REMOVE_CHILDREN
        } else {
            0
        };
        self.run_job(Operation::RemoveSnapshot {
            snapshot: snapshot.handle().raw()?,
            options,
        })
        .await?;
        snapshot.release();
        Ok(())
    }

    /// Clone this VM to `dest_vmx`, from `snapshot` or from the current
    /// state. A linked clone shares disks with its parent and needs a
    /// snapshot. The clone is opened through the same host connection.
    pub async fn clone_vm(
        &self,
        dest_vmx: &str,
        snapshot: Option<&Snapshot>,
        linked: bool,
    ) -> Result<VirtualMachine> {
        if dest_vmx.is_empty() {
            return Err(VmError::InvalidArgument("destination vmx path is empty".into()));
        }
        let snapshot = match snapshot {
            Some(s) => s.handle().raw()?,
            None => RawHandle::INVALID,
        };
        let op = Operation::CloneVm {
            snapshot,
            clone_type: if linked {
                clone_type::LINKED
            } else {
                clone_type::FULL
            },
            dest_vmx: dest_vmx.to_string(),
        };
        tracing::info!(vm = %self.handle.raw()?, dest_vmx, linked, "Cloning VM");
        let job = self.session.issue(&self.handle, &op)?;
        let handle = self.session.waiter(job).result_handle(HandleType::Vm).await?;
        Ok(Self {
            session: self.session.clone(),
            handle,
            _host: self._host.clone(),
        })
    }

    /// Remove the VM from the host, optionally with its disk files. The VM
    /// must be powered off.
    pub async fn delete(self, delete_files: bool) -> Result<()> {
        let options = if delete_files { VMDELETE_DISK_FILES } else { 0 };
        tracing::info!(vm = %self.handle.raw()?, delete_files, "Deleting VM");
        self.run_job(Operation::DeleteVm { options }).await
    }

    /// Read a variable. Unset variables read as an empty string.
    pub async fn read_variable(&self, var_type: VariableType, name: &str) -> Result<String> {
        let op = Operation::ReadVariable {
            var_type: var_type.raw(),
            name: name.to_string(),
        };
        let job = self.session.issue(&self.handle, &op)?;
        let value = self
            .session
            .waiter(job)
            .wait_one(PropertyId::JOB_RESULT_VM_VARIABLESTRING)
            .await?;
        Ok(value.into_string(PropertyId::JOB_RESULT_VM_VARIABLESTRING)?)
    }

    pub async fn write_variable(
        &self,
        var_type: VariableType,
        name: &str,
        value: &str,
    ) -> Result<()> {
        tracing::debug!(vm = %self.handle.raw()?, ?var_type, name, "Writing variable");
        self.run_job(Operation::WriteVariable {
            var_type: var_type.raw(),
            name: name.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Start the VMware Tools installer in the guest. With `wait`, returns
    /// once the installation has finished; otherwise once it has started.
    pub async fn install_tools(&self, auto_upgrade: bool, wait: bool) -> Result<()> {
        let mut options = install_tools::MOUNT_TOOLS_INSTALLER;
        if auto_upgrade {
            options |= install_tools::AUTO_UPGRADE;
        }
        if !wait {
            options |= install_tools::RETURN_IMMEDIATELY;
        }
        tracing::info!(vm = %self.handle.raw()?, auto_upgrade, wait, "Installing VMware Tools");
        self.run_job(Operation::InstallTools { options }).await
    }

    /// Upgrade the virtual hardware to the newest version the host supports.
    /// The VM must be powered off.
    pub async fn upgrade_virtual_hardware(&self) -> Result<()> {
        tracing::info!(vm = %self.handle.raw()?, "Upgrading virtual hardware");
        self.run_job(Operation::UpgradeVirtualHardware).await
    }

    pub async fn enable_shared_folders(&self, enabled: bool) -> Result<()> {
        self.run_job(Operation::EnableSharedFolders { enabled }).await
    }

    pub async fn add_shared_folder(
        &self,
        name: &str,
        host_path: &str,
        write_access: bool,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(VmError::InvalidArgument("share name is empty".into()));
        }
        tracing::debug!(vm = %self.handle.raw()?, name, host_path, write_access, "Adding shared folder");
        self.run_job(Operation::AddSharedFolder {
            name: name.to_string(),
            host_path: host_path.to_string(),
            flags: share_flags(write_access),
        })
        .await
    }

    pub async fn shared_folder_count(&self) -> Result<usize> {
        let job = self
            .session
            .issue(&self.handle, &Operation::GetNumSharedFolders)?;
        let count = self
            .session
            .waiter(job)
            .wait_one(PropertyId::JOB_RESULT_SHARED_FOLDER_COUNT)
            .await?
            .as_i32(PropertyId::JOB_RESULT_SHARED_FOLDER_COUNT)?;
        usize::try_from(count).map_err(|_| {
            vix_core::VixError::PropertyType {
                property: PropertyId::JOB_RESULT_SHARED_FOLDER_COUNT,
                expected: vix_core::PropertyKind::Integer,
            }
            .into()
        })
    }

    /// The share at `index`, in `0..shared_folder_count()`.
    pub async fn shared_folder_state(&self, index: usize) -> Result<SharedFolder> {
        let index = i32::try_from(index)
            .map_err(|_| VmError::InvalidArgument(format!("shared folder index {index}")))?;
        let job = self
            .session
            .issue(&self.handle, &Operation::GetSharedFolderState { index })?;
        let row = self.session.waiter(job).single_row(&SHARED_FOLDER_ROW).await?;
        SharedFolder::from_row(row)
    }

    pub async fn shared_folders(&self) -> Result<Vec<SharedFolder>> {
        let mut folders = Vec::new();
        for index in 0..self.shared_folder_count().await? {
            folders.push(self.shared_folder_state(index).await?);
        }
        Ok(folders)
    }

    /// Change the host path and access of the share called `name`.
    pub async fn set_shared_folder_state(
        &self,
        name: &str,
        host_path: &str,
        write_access: bool,
    ) -> Result<()> {
        self.run_job(Operation::SetSharedFolderState {
            name: name.to_string(),
            host_path: host_path.to_string(),
            flags: share_flags(write_access),
        })
        .await
    }

    pub async fn remove_shared_folder(&self, name: &str) -> Result<()> {
        tracing::debug!(vm = %self.handle.raw()?, name, "Removing shared folder");
        self.run_job(Operation::RemoveSharedFolder {
            name: name.to_string(),
        })
        .await
    }
}

fn launch_options(should_block: bool) -> i32 {
    if should_block {
        0
    } else {
        run_program::RETURN_IMMEDIATELY
    }
}
