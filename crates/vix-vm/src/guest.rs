//! Guest process and directory listings.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vix_core::native::file_attributes;
use vix_core::{PropertyId, PropertyValue, Violation, VixError};

/// Result properties of one `ListProcessesInGuest` row, in request order.
pub(crate) const PROCESS_ROW: [PropertyId; 6] = [
    PropertyId::JOB_RESULT_ITEM_NAME,
    PropertyId::JOB_RESULT_PROCESS_ID,
    PropertyId::JOB_RESULT_PROCESS_OWNER,
    PropertyId::JOB_RESULT_PROCESS_COMMAND,
    PropertyId::JOB_RESULT_PROCESS_BEING_DEBUGGED,
    PropertyId::JOB_RESULT_PROCESS_START_TIME,
];

/// Result properties of one `ListDirectoryInGuest` row, in request order.
pub(crate) const DIRECTORY_ROW: [PropertyId; 4] = [
    PropertyId::JOB_RESULT_ITEM_NAME,
    PropertyId::JOB_RESULT_FILE_SIZE,
    PropertyId::JOB_RESULT_FILE_FLAGS,
    PropertyId::JOB_RESULT_FILE_MOD_TIME,
];

/// A process running in the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessListEntry {
    pub name: String,
    pub pid: u64,
    pub owner: String,
    pub command: String,
    pub is_debugged: bool,
    pub start_time: DateTime<Utc>,
}

/// An entry of a guest directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub last_modified: DateTime<Utc>,
}

fn row<const N: usize>(values: Vec<PropertyValue>) -> Result<[PropertyValue; N]> {
    values.try_into().map_err(|values: Vec<PropertyValue>| {
        VixError::from(Violation::UnexpectedRowCount {
            expected: N,
            actual: values.len(),
        })
        .into()
    })
}

/// Guest timestamps are seconds since the epoch; out-of-range values map to
/// the epoch.
fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn unsigned(value: &PropertyValue, id: PropertyId) -> Result<u64> {
    u64::try_from(value.as_i64(id)?).map_err(|_| {
        VixError::PropertyType {
            property: id,
            expected: vix_core::PropertyKind::Int64,
        }
        .into()
    })
}

impl ProcessListEntry {
    pub(crate) fn from_row(values: Vec<PropertyValue>) -> Result<Self> {
        let [name, pid, owner, command, debugged, start] = row::<6>(values)?;
        Ok(Self {
            name: name.into_string(PropertyId::JOB_RESULT_ITEM_NAME)?,
            pid: unsigned(&pid, PropertyId::JOB_RESULT_PROCESS_ID)?,
            owner: owner.into_string(PropertyId::JOB_RESULT_PROCESS_OWNER)?,
            command: command.into_string(PropertyId::JOB_RESULT_PROCESS_COMMAND)?,
            is_debugged: debugged.as_bool(PropertyId::JOB_RESULT_PROCESS_BEING_DEBUGGED)?,
            start_time: timestamp(start.as_i64(PropertyId::JOB_RESULT_PROCESS_START_TIME)?),
        })
    }
}

impl DirectoryEntry {
    pub(crate) fn from_row(values: Vec<PropertyValue>) -> Result<Self> {
        let [name, size, flags, modified] = row::<4>(values)?;
        let flags = flags.as_i32(PropertyId::JOB_RESULT_FILE_FLAGS)?;
        Ok(Self {
            name: name.into_string(PropertyId::JOB_RESULT_ITEM_NAME)?,
            size: unsigned(&size, PropertyId::JOB_RESULT_FILE_SIZE)?,
            is_dir: flags & file_attributes::DIRECTORY != 0,
            is_symlink: flags & file_attributes::SYMLINK != 0,
            last_modified: timestamp(modified.as_i64(PropertyId::JOB_RESULT_FILE_MOD_TIME)?),
        })
    }
}
