//! Property identifiers and typed property values.

use crate::error::{Result, VixError};
use crate::handle::RawHandle;
use std::fmt;

/// A `VixPropertyID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub i32);

impl PropertyId {
    pub const NONE: PropertyId = PropertyId(0);

    // Handle properties
    pub const META_DATA_CONTAINER: PropertyId = PropertyId(2);
    pub const HOST_HOSTTYPE: PropertyId = PropertyId(50);
    pub const HOST_API_VERSION: PropertyId = PropertyId(51);
    pub const HOST_SOFTWARE_VERSION: PropertyId = PropertyId(52);
    pub const VM_NUM_VCPUS: PropertyId = PropertyId(101);
    pub const VM_VMX_PATHNAME: PropertyId = PropertyId(103);
    pub const VM_VMTEAM_PATHNAME: PropertyId = PropertyId(105);
    pub const VM_MEMORY_SIZE: PropertyId = PropertyId(106);
    pub const VM_READ_ONLY: PropertyId = PropertyId(107);
    pub const VM_NAME: PropertyId = PropertyId(108);
    pub const VM_GUESTOS: PropertyId = PropertyId(109);
    pub const VM_IN_VMTEAM: PropertyId = PropertyId(128);
    pub const VM_POWER_STATE: PropertyId = PropertyId(129);
    pub const VM_TOOLS_STATE: PropertyId = PropertyId(152);
    pub const VM_IS_RUNNING: PropertyId = PropertyId(196);
    pub const VM_SUPPORTED_FEATURES: PropertyId = PropertyId(197);
    pub const VM_SSL_ERROR: PropertyId = PropertyId(293);
    pub const FOUND_ITEM_LOCATION: PropertyId = PropertyId(4010);
    pub const SNAPSHOT_DISPLAYNAME: PropertyId = PropertyId(4200);
    pub const SNAPSHOT_DESCRIPTION: PropertyId = PropertyId(4201);
    pub const SNAPSHOT_POWERSTATE: PropertyId = PropertyId(4205);
    pub const GUEST_SHAREDFOLDERS_SHARES_PATH: PropertyId = PropertyId(4525);
    pub const VM_ENCRYPTION_PASSWORD: PropertyId = PropertyId(7001);

    // Job result properties
    pub const JOB_RESULT_ERROR_CODE: PropertyId = PropertyId(3000);
    pub const JOB_RESULT_VM_IN_GROUP: PropertyId = PropertyId(3001);
    pub const JOB_RESULT_USER_MESSAGE: PropertyId = PropertyId(3002);
    pub const JOB_RESULT_EXIT_CODE: PropertyId = PropertyId(3004);
    pub const JOB_RESULT_COMMAND_OUTPUT: PropertyId = PropertyId(3005);
    pub const JOB_RESULT_HANDLE: PropertyId = PropertyId(3010);
    pub const JOB_RESULT_GUEST_OBJECT_EXISTS: PropertyId = PropertyId(3011);
    pub const JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME: PropertyId = PropertyId(3017);
    pub const JOB_RESULT_GUEST_PROGRAM_EXIT_CODE: PropertyId = PropertyId(3018);
    pub const JOB_RESULT_ITEM_NAME: PropertyId = PropertyId(3035);
    pub const JOB_RESULT_FOUND_ITEM_DESCRIPTION: PropertyId = PropertyId(3036);
    pub const JOB_RESULT_SHARED_FOLDER_COUNT: PropertyId = PropertyId(3046);
    pub const JOB_RESULT_SHARED_FOLDER_HOST: PropertyId = PropertyId(3048);
    pub const JOB_RESULT_SHARED_FOLDER_FLAGS: PropertyId = PropertyId(3049);
    pub const JOB_RESULT_PROCESS_ID: PropertyId = PropertyId(3051);
    pub const JOB_RESULT_PROCESS_OWNER: PropertyId = PropertyId(3052);
    pub const JOB_RESULT_PROCESS_COMMAND: PropertyId = PropertyId(3053);
    pub const JOB_RESULT_FILE_FLAGS: PropertyId = PropertyId(3054);
    pub const JOB_RESULT_PROCESS_START_TIME: PropertyId = PropertyId(3055);
    pub const JOB_RESULT_VM_VARIABLESTRING: PropertyId = PropertyId(3056);
    pub const JOB_RESULT_PROCESS_BEING_DEBUGGED: PropertyId = PropertyId(3057);
    pub const JOB_RESULT_SCREEN_IMAGE_SIZE: PropertyId = PropertyId(3058);
    pub const JOB_RESULT_SCREEN_IMAGE_DATA: PropertyId = PropertyId(3059);
    pub const JOB_RESULT_FILE_SIZE: PropertyId = PropertyId(3061);
    pub const JOB_RESULT_FILE_MOD_TIME: PropertyId = PropertyId(3062);
    pub const JOB_RESULT_EXTRA_ERROR_INFO: PropertyId = PropertyId(3084);

    /// The value kind a job-result property is delivered as.
    ///
    /// Job results have no per-handle type query, so the wait/nth-row calls
    /// need to know how to allocate each out-parameter up front.
    pub fn result_kind(self) -> PropertyKind {
        match self {
            Self::JOB_RESULT_ITEM_NAME
            | Self::JOB_RESULT_VM_VARIABLESTRING
            | Self::JOB_RESULT_COMMAND_OUTPUT
            | Self::JOB_RESULT_PROCESS_OWNER
            | Self::JOB_RESULT_PROCESS_COMMAND
            | Self::JOB_RESULT_SHARED_FOLDER_HOST
            | Self::JOB_RESULT_USER_MESSAGE
            | Self::JOB_RESULT_FOUND_ITEM_DESCRIPTION
            | Self::JOB_RESULT_EXTRA_ERROR_INFO => PropertyKind::String,
            Self::JOB_RESULT_PROCESS_ID
            | Self::JOB_RESULT_FILE_SIZE
            | Self::JOB_RESULT_FILE_MOD_TIME
            | Self::JOB_RESULT_PROCESS_START_TIME => PropertyKind::Int64,
            Self::JOB_RESULT_PROCESS_BEING_DEBUGGED
            | Self::JOB_RESULT_GUEST_OBJECT_EXISTS
            | Self::JOB_RESULT_VM_IN_GROUP => PropertyKind::Bool,
            Self::JOB_RESULT_HANDLE => PropertyKind::Handle,
            Self::JOB_RESULT_SCREEN_IMAGE_DATA => PropertyKind::Blob,
            _ => PropertyKind::Integer,
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `VixPropertyType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Integer,
    String,
    Bool,
    Handle,
    Int64,
    Blob,
}

impl PropertyKind {
    /// Map a native `VIX_PROPERTYTYPE_*` value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::Integer),
            2 => Some(Self::String),
            3 => Some(Self::Bool),
            4 => Some(Self::Handle),
            5 => Some(Self::Int64),
            6 => Some(Self::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyKind::Integer => "integer",
            PropertyKind::String => "string",
            PropertyKind::Bool => "bool",
            PropertyKind::Handle => "handle",
            PropertyKind::Int64 => "int64",
            PropertyKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A property value read from a handle or job result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Integer(i32),
    Int64(i64),
    String(String),
    Bool(bool),
    Handle(RawHandle),
    Blob(Vec<u8>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Integer(_) => PropertyKind::Integer,
            PropertyValue::Int64(_) => PropertyKind::Int64,
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Handle(_) => PropertyKind::Handle,
            PropertyValue::Blob(_) => PropertyKind::Blob,
        }
    }

    /// Integer view of `Integer`, `Int64` and `Bool` values.
    pub fn as_i64(&self, property: PropertyId) -> Result<i64> {
        match self {
            PropertyValue::Integer(v) => Ok(i64::from(*v)),
            PropertyValue::Int64(v) => Ok(*v),
            PropertyValue::Bool(v) => Ok(i64::from(*v)),
            _ => Err(VixError::PropertyType {
                property,
                expected: PropertyKind::Int64,
            }),
        }
    }

    pub fn as_i32(&self, property: PropertyId) -> Result<i32> {
        match self {
            PropertyValue::Integer(v) => Ok(*v),
            _ => Err(VixError::PropertyType {
                property,
                expected: PropertyKind::Integer,
            }),
        }
    }

    pub fn as_bool(&self, property: PropertyId) -> Result<bool> {
        match self {
            PropertyValue::Bool(v) => Ok(*v),
            PropertyValue::Integer(v) => Ok(*v != 0),
            _ => Err(VixError::PropertyType {
                property,
                expected: PropertyKind::Bool,
            }),
        }
    }

    pub fn as_str(&self, property: PropertyId) -> Result<&str> {
        match self {
            PropertyValue::String(v) => Ok(v),
            _ => Err(VixError::PropertyType {
                property,
                expected: PropertyKind::String,
            }),
        }
    }

    pub fn into_string(self, property: PropertyId) -> Result<String> {
        match self {
            PropertyValue::String(v) => Ok(v),
            _ => Err(VixError::PropertyType {
                property,
                expected: PropertyKind::String,
            }),
        }
    }

    pub fn as_handle(&self, property: PropertyId) -> Result<RawHandle> {
        match self {
            PropertyValue::Handle(v) => Ok(*v),
            _ => Err(VixError::PropertyType {
                property,
                expected: PropertyKind::Handle,
            }),
        }
    }
}
