//! Binding to the VMware VIX C library.
//!
//! Enabled with the `vix-ffi` feature; links `vixAllProducts`. Every
//! asynchronous entry point gets [`trampoline`] as its callback and a boxed
//! [`Subscription`] as client data. The box is reclaimed after the
//! job-completed event has been delivered, or immediately when the library
//! does not return a job. A job whose completion is never delivered leaks its
//! box.
//!
//! The property getters are C variadics terminated by `VIX_PROPERTY_NONE`.
//! Calls are expanded per arity up to [`MAX_PROPERTIES`].

use crate::error::ErrorCode;
use crate::handle::{HandleType, RawHandle};
use crate::native::{
    Countable, Derivation, EventType, NativeApi, NativeResult, Operation, Subscription,
};
use crate::property::{PropertyId, PropertyKind, PropertyValue};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::AssertUnwindSafe;
use std::ptr;

type VixHandle = c_int;
type VixError = u64;
type VixEventProc = extern "C" fn(VixHandle, c_int, VixHandle, *mut c_void);

const VIX_API_VERSION: c_int = -1;
const VIX_INVALID_HANDLE: VixHandle = 0;
const VIX_PROPERTY_NONE: c_int = 0;

const VIX_PROPERTYTYPE_INTEGER: c_int = 1;
const VIX_PROPERTYTYPE_STRING: c_int = 2;
const VIX_PROPERTYTYPE_BOOL: c_int = 3;
const VIX_PROPERTYTYPE_HANDLE: c_int = 4;
const VIX_PROPERTYTYPE_INT64: c_int = 5;
const VIX_PROPERTYTYPE_BLOB: c_int = 6;

/// Most properties a single getter call can request.
pub const MAX_PROPERTIES: usize = 6;

#[link(name = "vixAllProducts")]
extern "C" {
    fn Vix_GetHandleType(handle: VixHandle) -> c_int;
    fn Vix_AddRefHandle(handle: VixHandle);
    fn Vix_ReleaseHandle(handle: VixHandle);
    fn Vix_GetPropertyType(handle: VixHandle, id: c_int, kind: *mut c_int) -> VixError;
    fn Vix_GetProperties(handle: VixHandle, first: c_int, ...) -> VixError;
    fn Vix_FreeBuffer(p: *mut c_void);
    fn Vix_GetErrorText(err: VixError, locale: *const c_char) -> *const c_char;

    fn VixJob_Wait(job: VixHandle, first: c_int, ...) -> VixError;
    fn VixJob_CheckCompletion(job: VixHandle, complete: *mut c_char) -> VixError;
    fn VixJob_GetError(job: VixHandle) -> VixError;
    fn VixJob_GetNumProperties(job: VixHandle, id: c_int) -> c_int;
    fn VixJob_GetNthProperties(job: VixHandle, index: c_int, first: c_int, ...) -> VixError;

    fn VixHost_Connect(
        api_version: c_int,
        host_type: c_int,
        host_name: *const c_char,
        host_port: c_int,
        user_name: *const c_char,
        password: *const c_char,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixHost_OpenVM(
        host: VixHandle,
        vmx_path: *const c_char,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;

    fn VixVM_PowerOn(
        vm: VixHandle,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_PowerOff(
        vm: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_Reset(
        vm: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_Suspend(
        vm: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_Pause(
        vm: VixHandle,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_Unpause(
        vm: VixHandle,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_WaitForToolsInGuest(
        vm: VixHandle,
        timeout_secs: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_LoginInGuest(
        vm: VixHandle,
        user: *const c_char,
        password: *const c_char,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_LogoutFromGuest(
        vm: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_RunProgramInGuest(
        vm: VixHandle,
        program: *const c_char,
        args: *const c_char,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_RunScriptInGuest(
        vm: VixHandle,
        interpreter: *const c_char,
        script: *const c_char,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_KillProcessInGuest(
        vm: VixHandle,
        pid: u64,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_ListProcessesInGuest(
        vm: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_ListDirectoryInGuest(
        vm: VixHandle,
        path: *const c_char,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_CreateSnapshot(
        vm: VixHandle,
        name: *const c_char,
        description: *const c_char,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_RevertToSnapshot(
        vm: VixHandle,
        snapshot: VixHandle,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_RemoveSnapshot(
        vm: VixHandle,
        snapshot: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_Clone(
        vm: VixHandle,
        snapshot: VixHandle,
        clone_type: c_int,
        dest_vmx: *const c_char,
        options: c_int,
        property_list: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_Delete(
        vm: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_ReadVariable(
        vm: VixHandle,
        variable_type: c_int,
        name: *const c_char,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_WriteVariable(
        vm: VixHandle,
        variable_type: c_int,
        name: *const c_char,
        value: *const c_char,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_InstallTools(
        vm: VixHandle,
        options: c_int,
        command_line_args: *const c_char,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_UpgradeVirtualHardware(
        vm: VixHandle,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_AddSharedFolder(
        vm: VixHandle,
        share_name: *const c_char,
        host_path: *const c_char,
        flags: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_EnableSharedFolders(
        vm: VixHandle,
        enabled: c_char,
        options: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_GetNumSharedFolders(
        vm: VixHandle,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_GetSharedFolderState(
        vm: VixHandle,
        index: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_RemoveSharedFolder(
        vm: VixHandle,
        share_name: *const c_char,
        flags: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;
    fn VixVM_SetSharedFolderState(
        vm: VixHandle,
        share_name: *const c_char,
        host_path: *const c_char,
        flags: c_int,
        callback: Option<VixEventProc>,
        client_data: *mut c_void,
    ) -> VixHandle;

    fn VixVM_GetNumRootSnapshots(vm: VixHandle, result: *mut c_int) -> VixError;
    fn VixVM_GetRootSnapshot(vm: VixHandle, index: c_int, snapshot: *mut VixHandle) -> VixError;
    fn VixVM_GetCurrentSnapshot(vm: VixHandle, snapshot: *mut VixHandle) -> VixError;
    fn VixVM_GetNamedSnapshot(
        vm: VixHandle,
        name: *const c_char,
        snapshot: *mut VixHandle,
    ) -> VixError;
    fn VixSnapshot_GetNumChildren(snapshot: VixHandle, result: *mut c_int) -> VixError;
    fn VixSnapshot_GetChild(snapshot: VixHandle, index: c_int, child: *mut VixHandle)
        -> VixError;
    fn VixSnapshot_GetParent(snapshot: VixHandle, parent: *mut VixHandle) -> VixError;
}

/// Native callback. `client_data` is a leaked `Box<Subscription>`.
extern "C" fn trampoline(
    handle: VixHandle,
    event_type: c_int,
    _more_event_info: VixHandle,
    client_data: *mut c_void,
) {
    if client_data.is_null() {
        return;
    }
    let event = EventType(event_type);
    // SAFETY: set by `issue` to a live Box<Subscription>, freed below only
    // after the final event.
    let subscription = unsafe { &*(client_data as *const Subscription) };
    let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
        subscription.deliver(RawHandle(handle), event)
    }));
    if delivered.is_err() {
        tracing::error!(job = handle, %event, "Event sink panicked");
    }
    if event == EventType::JOB_COMPLETED {
        // SAFETY: no further events are delivered for this job.
        drop(unsafe { Box::from_raw(client_data as *mut Subscription) });
    }
}

fn check(err: VixError) -> NativeResult<()> {
    ErrorCode(err).check().map_err(|_| ErrorCode(err))
}

fn cstring(s: &str) -> NativeResult<CString> {
    CString::new(s).map_err(|_| ErrorCode::INVALID_ARG)
}

fn opt_cstring(s: Option<&str>) -> NativeResult<Option<CString>> {
    s.map(cstring).transpose()
}

fn opt_ptr(s: &Option<CString>) -> *const c_char {
    s.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

fn to_index(index: usize) -> NativeResult<c_int> {
    c_int::try_from(index).map_err(|_| ErrorCode::INVALID_ARG)
}

/// Out-parameter storage for one property value.
enum Slot {
    Integer(c_int),
    Int64(i64),
    Bool(c_char),
    Handle(VixHandle),
    String(*mut c_char),
}

impl Slot {
    fn new(kind: PropertyKind) -> NativeResult<Self> {
        match kind {
            PropertyKind::Integer => Ok(Slot::Integer(0)),
            PropertyKind::Int64 => Ok(Slot::Int64(0)),
            PropertyKind::Bool => Ok(Slot::Bool(0)),
            PropertyKind::Handle => Ok(Slot::Handle(VIX_INVALID_HANDLE)),
            PropertyKind::String => Ok(Slot::String(ptr::null_mut())),
            PropertyKind::Blob => Err(ErrorCode::NOT_SUPPORTED),
        }
    }

    fn out_ptr(&mut self) -> *mut c_void {
        match self {
            Slot::Integer(v) => v as *mut c_int as *mut c_void,
            Slot::Int64(v) => v as *mut i64 as *mut c_void,
            Slot::Bool(v) => v as *mut c_char as *mut c_void,
            Slot::Handle(v) => v as *mut VixHandle as *mut c_void,
            Slot::String(v) => v as *mut *mut c_char as *mut c_void,
        }
    }

    fn take(&mut self) -> PropertyValue {
        match self {
            Slot::Integer(v) => PropertyValue::Integer(*v),
            Slot::Int64(v) => PropertyValue::Int64(*v),
            Slot::Bool(v) => PropertyValue::Bool(*v != 0),
            Slot::Handle(v) => PropertyValue::Handle(RawHandle(*v)),
            Slot::String(p) => {
                let value = if p.is_null() {
                    String::new()
                } else {
                    // SAFETY: the library wrote a NUL-terminated string.
                    unsafe { CStr::from_ptr(*p) }.to_string_lossy().into_owned()
                };
                PropertyValue::String(value)
            }
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Slot::String(p) = self {
            if !p.is_null() {
                // SAFETY: string out-params are allocated by the library.
                unsafe { Vix_FreeBuffer(*p as *mut c_void) };
            }
        }
    }
}

fn raw_kind(raw: c_int) -> NativeResult<PropertyKind> {
    match raw {
        VIX_PROPERTYTYPE_INTEGER => Ok(PropertyKind::Integer),
        VIX_PROPERTYTYPE_STRING => Ok(PropertyKind::String),
        VIX_PROPERTYTYPE_BOOL => Ok(PropertyKind::Bool),
        VIX_PROPERTYTYPE_HANDLE => Ok(PropertyKind::Handle),
        VIX_PROPERTYTYPE_INT64 => Ok(PropertyKind::Int64),
        VIX_PROPERTYTYPE_BLOB => Ok(PropertyKind::Blob),
        _ => Err(ErrorCode::TYPE_MISMATCH),
    }
}

/// Expand a variadic `(id, out)*, NONE` getter call for up to six pairs.
macro_rules! variadic_get {
    ($func:ident($($fixed:expr),*), $pairs:expr) => {{
        let p = $pairs;
        // SAFETY: every out pointer matches the kind of its property and
        // outlives the call.
        unsafe {
            match p.len() {
                0 => Ok($func($($fixed,)* VIX_PROPERTY_NONE)),
                1 => Ok($func($($fixed,)* p[0].0, p[0].1, VIX_PROPERTY_NONE)),
                2 => Ok($func($($fixed,)* p[0].0, p[0].1, p[1].0, p[1].1, VIX_PROPERTY_NONE)),
                3 => Ok($func(
                    $($fixed,)* p[0].0, p[0].1, p[1].0, p[1].1, p[2].0, p[2].1,
                    VIX_PROPERTY_NONE,
                )),
                4 => Ok($func(
                    $($fixed,)* p[0].0, p[0].1, p[1].0, p[1].1, p[2].0, p[2].1,
                    p[3].0, p[3].1, VIX_PROPERTY_NONE,
                )),
                5 => Ok($func(
                    $($fixed,)* p[0].0, p[0].1, p[1].0, p[1].1, p[2].0, p[2].1,
                    p[3].0, p[3].1, p[4].0, p[4].1, VIX_PROPERTY_NONE,
                )),
                6 => Ok($func(
                    $($fixed,)* p[0].0, p[0].1, p[1].0, p[1].1, p[2].0, p[2].1,
                    p[3].0, p[3].1, p[4].0, p[4].1, p[5].0, p[5].1,
                    VIX_PROPERTY_NONE,
                )),
                _ => Err(ErrorCode::INVALID_ARG),
            }
        }
    }};
}

/// Allocate slots and build the `(id, out)` argument list.
fn prepare(
    ids: &[PropertyId],
    kinds: impl Iterator<Item = NativeResult<PropertyKind>>,
) -> NativeResult<Vec<Slot>> {
    if ids.len() > MAX_PROPERTIES {
        return Err(ErrorCode::INVALID_ARG);
    }
    kinds.map(|kind| kind.and_then(Slot::new)).collect()
}

fn pairs(ids: &[PropertyId], slots: &mut [Slot]) -> Vec<(c_int, *mut c_void)> {
    ids.iter()
        .zip(slots.iter_mut())
        .map(|(id, slot)| (id.0, slot.out_ptr()))
        .collect()
}

fn collect(slots: &mut [Slot]) -> Vec<PropertyValue> {
    slots.iter_mut().map(Slot::take).collect()
}

/// The native VIX library.
#[derive(Debug, Default)]
pub struct VixLibrary {
    _private: (),
}

impl VixLibrary {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// The library's description of `code`.
    pub fn error_text(&self, code: ErrorCode) -> String {
        // SAFETY: returns a static string or null.
        let text = unsafe { Vix_GetErrorText(code.0, ptr::null()) };
        if text.is_null() {
            return code.to_string();
        }
        unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
    }

    fn start(
        &self,
        target: VixHandle,
        op: &Operation,
        callback: Option<VixEventProc>,
        data: *mut c_void,
    ) -> NativeResult<VixHandle> {
        let none = VIX_INVALID_HANDLE;
        // SAFETY: every pointer argument is either null or a CString that
        // lives until the call returns.
        let job = unsafe {
            match op {
                Operation::Connect {
                    provider,
                    host,
                    port,
                    user,
                    password,
                } => {
                    let host = opt_cstring(host.as_deref())?;
                    let user = opt_cstring(user.as_deref())?;
                    let password = opt_cstring(password.as_deref())?;
                    VixHost_Connect(
                        VIX_API_VERSION,
                        provider.raw(),
                        opt_ptr(&host),
                        *port,
                        opt_ptr(&user),
                        opt_ptr(&password),
                        0,
                        none,
                        callback,
                        data,
                    )
                }
                Operation::OpenVm { vmx_path } => {
                    let path = cstring(vmx_path)?;
                    VixHost_OpenVM(target, path.as_ptr(), 0, none, callback, data)
                }
                Operation::PowerOn { options } => {
                    VixVM_PowerOn(target, *options, none, callback, data)
                }
                Operation::PowerOff { options } => VixVM_PowerOff(target, *options, callback, data),
                Operation::Reset { options } => VixVM_Reset(target, *options, callback, data),
                Operation::Suspend => VixVM_Suspend(target, 0, callback, data),
                Operation::Pause => VixVM_Pause(target, 0, none, callback, data),
                Operation::Unpause => VixVM_Unpause(target, 0, none, callback, data),
                Operation::WaitForTools { timeout_secs } => {
                    VixVM_WaitForToolsInGuest(target, *timeout_secs, callback, data)
                }
                Operation::LoginInGuest {
                    user,
                    password,
                    options,
                } => {
                    let user = cstring(user)?;
                    let password = cstring(password)?;
                    VixVM_LoginInGuest(
                        target,
                        user.as_ptr(),
                        password.as_ptr(),
                        *options,
                        callback,
                        data,
                    )
                }
                Operation::LogoutFromGuest => VixVM_LogoutFromGuest(target, callback, data),
                Operation::RunProgramInGuest {
                    program,
                    args,
                    options,
                } => {
                    let program = cstring(program)?;
                    let args = opt_cstring(args.as_deref())?;
                    VixVM_RunProgramInGuest(
                        target,
                        program.as_ptr(),
                        opt_ptr(&args),
                        *options,
                        none,
                        callback,
                        data,
                    )
                }
                Operation::RunScriptInGuest {
                    interpreter,
                    script,
                    options,
                } => {
                    let interpreter = opt_cstring(interpreter.as_deref())?;
                    let script = cstring(script)?;
                    VixVM_RunScriptInGuest(
                        target,
                        opt_ptr(&interpreter),
                        script.as_ptr(),
                        *options,
                        none,
                        callback,
                        data,
                    )
                }
                Operation::KillProcessInGuest { pid } => {
                    VixVM_KillProcessInGuest(target, *pid, 0, callback, data)
                }
                Operation::ListProcessesInGuest => {
                    VixVM_ListProcessesInGuest(target, 0, callback, data)
                }
                Operation::ListDirectoryInGuest { path } => {
                    let path = cstring(path)?;
                    VixVM_ListDirectoryInGuest(target, path.as_ptr(), 0, callback, data)
                }
                Operation::CreateSnapshot {
                    name,
                    description,
                    options,
                } => {
                    let name = opt_cstring(name.as_deref())?;
                    let description = opt_cstring(description.as_deref())?;
                    VixVM_CreateSnapshot(
                        target,
                        opt_ptr(&name),
                        opt_ptr(&description),
                        *options,
                        none,
                        callback,
                        data,
                    )
                }
                Operation::RevertToSnapshot { snapshot, options } => {
                    VixVM_RevertToSnapshot(target, snapshot.0, *options, none, callback, data)
                }
                Operation::RemoveSnapshot { snapshot, options } => {
                    VixVM_RemoveSnapshot(target, snapshot.0, *options, callback, data)
                }
                Operation::CloneVm {
                    snapshot,
                    clone_type,
                    dest_vmx,
                } => {
                    let dest = cstring(dest_vmx)?;
                    VixVM_Clone(
                        target,
                        snapshot.0,
                        *clone_type,
                        dest.as_ptr(),
                        0,
                        none,
                        callback,
                        data,
                    )
                }
                Operation::DeleteVm { options } => VixVM_Delete(target, *options, callback, data),
                Operation::ReadVariable { var_type, name } => {
                    let name = cstring(name)?;
                    VixVM_ReadVariable(target, *var_type, name.as_ptr(), 0, callback, data)
                }
                Operation::WriteVariable {
                    var_type,
                    name,
                    value,
                } => {
                    let name = cstring(name)?;
                    let value = cstring(value)?;
                    VixVM_WriteVariable(
                        target,
                        *var_type,
                        name.as_ptr(),
                        value.as_ptr(),
                        0,
                        callback,
                        data,
                    )
                }
                Operation::InstallTools { options } => {
                    VixVM_InstallTools(target, *options, ptr::null(), callback, data)
                }
                Operation::UpgradeVirtualHardware => {
                    VixVM_UpgradeVirtualHardware(target, 0, callback, data)
                }
                Operation::AddSharedFolder {
                    name,
                    host_path,
                    flags,
                } => {
                    let name = cstring(name)?;
                    let host_path = cstring(host_path)?;
                    VixVM_AddSharedFolder(
                        target,
                        name.as_ptr(),
                        host_path.as_ptr(),
                        *flags,
                        callback,
                        data,
                    )
                }
                Operation::EnableSharedFolders { enabled } => {
                    VixVM_EnableSharedFolders(target, c_char::from(*enabled), 0, callback, data)
                }
                Operation::GetNumSharedFolders => {
                    VixVM_GetNumSharedFolders(target, callback, data)
                }
                Operation::GetSharedFolderState { index } => {
                    VixVM_GetSharedFolderState(target, *index, callback, data)
                }
                Operation::RemoveSharedFolder { name } => {
                    let name = cstring(name)?;
                    VixVM_RemoveSharedFolder(target, name.as_ptr(), 0, callback, data)
                }
                Operation::SetSharedFolderState {
                    name,
                    host_path,
                    flags,
                } => {
                    let name = cstring(name)?;
                    let host_path = cstring(host_path)?;
                    VixVM_SetSharedFolderState(
                        target,
                        name.as_ptr(),
                        host_path.as_ptr(),
                        *flags,
                        callback,
                        data,
                    )
                }
            }
        };
        Ok(job)
    }
}

impl NativeApi for VixLibrary {
    fn handle_type(&self, handle: RawHandle) -> HandleType {
        // SAFETY: any integer is accepted; unknown handles report NONE.
        HandleType::from_raw(unsafe { Vix_GetHandleType(handle.0) })
    }

    fn add_ref(&self, handle: RawHandle) {
        unsafe { Vix_AddRefHandle(handle.0) }
    }

    fn release(&self, handle: RawHandle) {
        unsafe { Vix_ReleaseHandle(handle.0) }
    }

    fn get_properties(
        &self,
        handle: RawHandle,
        ids: &[PropertyId],
    ) -> NativeResult<Vec<PropertyValue>> {
        let kinds = ids.iter().map(|id| {
            let mut raw = 0;
            // SAFETY: `raw` outlives the call.
            check(unsafe { Vix_GetPropertyType(handle.0, id.0, &mut raw) })?;
            raw_kind(raw)
        });
        let mut slots = prepare(ids, kinds)?;
        let args = pairs(ids, &mut slots);
        check(variadic_get!(Vix_GetProperties(handle.0), &args)?)?;
        Ok(collect(&mut slots))
    }

    fn issue(
        &self,
        target: RawHandle,
        op: &Operation,
        events: Option<Subscription>,
    ) -> NativeResult<RawHandle> {
        let (callback, data) = match events {
            Some(subscription) => (
                Some(trampoline as VixEventProc),
                Box::into_raw(Box::new(subscription)) as *mut c_void,
            ),
            None => (None, ptr::null_mut()),
        };

        let started = self.start(target.0, op, callback, data).and_then(|job| {
            if job == VIX_INVALID_HANDLE {
                Err(ErrorCode::INVALID_HANDLE)
            } else {
                Ok(job)
            }
        });
        match started {
            Ok(job) => Ok(RawHandle(job)),
            Err(code) => {
                if !data.is_null() {
                    // SAFETY: no job exists, so the callback will never run.
                    drop(unsafe { Box::from_raw(data as *mut Subscription) });
                }
                tracing::error!(op = op.name(), error = %code, "Operation not started");
                Err(code)
            }
        }
    }

    fn derive(&self, parent: RawHandle, derivation: &Derivation) -> NativeResult<RawHandle> {
        let mut out = VIX_INVALID_HANDLE;
        // SAFETY: `out` and any CString outlive the call.
        let err = unsafe {
            match derivation {
                Derivation::CurrentSnapshot => VixVM_GetCurrentSnapshot(parent.0, &mut out),
                Derivation::NamedSnapshot(name) => {
                    let name = cstring(name)?;
                    VixVM_GetNamedSnapshot(parent.0, name.as_ptr(), &mut out)
                }
                Derivation::RootSnapshot(index) => {
                    VixVM_GetRootSnapshot(parent.0, to_index(*index)?, &mut out)
                }
                Derivation::SnapshotChild(index) => {
                    VixSnapshot_GetChild(parent.0, to_index(*index)?, &mut out)
                }
                Derivation::SnapshotParent => VixSnapshot_GetParent(parent.0, &mut out),
            }
        };
        check(err)?;
        Ok(RawHandle(out))
    }

    fn count(&self, handle: RawHandle, what: Countable) -> NativeResult<usize> {
        let mut out: c_int = 0;
        // SAFETY: `out` outlives the call.
        let err = unsafe {
            match what {
                Countable::RootSnapshots => VixVM_GetNumRootSnapshots(handle.0, &mut out),
                Countable::SnapshotChildren => VixSnapshot_GetNumChildren(handle.0, &mut out),
            }
        };
        check(err)?;
        usize::try_from(out).map_err(|_| ErrorCode::FAIL)
    }

    fn job_wait(&self, job: RawHandle, ids: &[PropertyId]) -> NativeResult<Vec<PropertyValue>> {
        let mut slots = prepare(ids, ids.iter().map(|id| Ok(id.result_kind())))?;
        let args = pairs(ids, &mut slots);
        check(variadic_get!(VixJob_Wait(job.0), &args)?)?;
        Ok(collect(&mut slots))
    }

    fn job_check_completion(&self, job: RawHandle) -> NativeResult<bool> {
        let mut complete: c_char = 0;
        check(unsafe { VixJob_CheckCompletion(job.0, &mut complete) })?;
        Ok(complete != 0)
    }

    fn job_error(&self, job: RawHandle) -> ErrorCode {
        ErrorCode(unsafe { VixJob_GetError(job.0) })
    }

    fn job_num_rows(&self, job: RawHandle, id: PropertyId) -> usize {
        let count = unsafe { VixJob_GetNumProperties(job.0, id.0) };
        usize::try_from(count).unwrap_or(0)
    }

    fn job_nth_row(
        &self,
        job: RawHandle,
        index: usize,
        ids: &[PropertyId],
    ) -> NativeResult<Vec<PropertyValue>> {
        let index = to_index(index)?;
        let mut slots = prepare(ids, ids.iter().map(|id| Ok(id.result_kind())))?;
        let args = pairs(ids, &mut slots);
        check(variadic_get!(VixJob_GetNthProperties(job.0, index), &args)?)?;
        Ok(collect(&mut slots))
    }
}
