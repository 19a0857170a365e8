//! Host directories shared with the guest.

use crate::error::Result;
use serde::Serialize;
use vix_core::native::SHAREDFOLDER_WRITE_ACCESS;
use vix_core::{PropertyId, PropertyValue, Violation, VixError};

/// Result properties of a `GetSharedFolderState` row, in request order.
pub(crate) const SHARED_FOLDER_ROW: [PropertyId; 3] = [
    PropertyId::JOB_RESULT_ITEM_NAME,
    PropertyId::JOB_RESULT_SHARED_FOLDER_HOST,
    PropertyId::JOB_RESULT_SHARED_FOLDER_FLAGS,
];

/// One shared folder of a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedFolder {
    /// Share name as seen by the guest.
    pub name: String,
    pub host_path: String,
    pub write_access: bool,
}

impl SharedFolder {
    pub(crate) fn from_row(values: Vec<PropertyValue>) -> Result<Self> {
        let [name, host_path, flags]: [PropertyValue; 3] =
            values.try_into().map_err(|values: Vec<PropertyValue>| {
                VixError::from(Violation::UnexpectedRowCount {
                    expected: SHARED_FOLDER_ROW.len(),
                    actual: values.len(),
                })
            })?;
        let flags = flags.as_i32(PropertyId::JOB_RESULT_SHARED_FOLDER_FLAGS)?;
        Ok(Self {
            name: name.into_string(PropertyId::JOB_RESULT_ITEM_NAME)?,
            host_path: host_path.into_string(PropertyId::JOB_RESULT_SHARED_FOLDER_HOST)?,
            write_access: flags & SHAREDFOLDER_WRITE_ACCESS != 0,
        })
    }
}

/// Flags for adding or updating a share.
pub(crate) fn share_flags(write_access: bool) -> i32 {
    if write_access {
        SHAREDFOLDER_WRITE_ACCESS
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmError;

    #[test]
    fn test_write_access_flag() {
        let folder = SharedFolder::from_row(vec![
            PropertyValue::String("src".into()),
            PropertyValue::String("/home/me/src".into()),
            PropertyValue::Integer(SHAREDFOLDER_WRITE_ACCESS),
        ])
        .unwrap();
        assert!(folder.write_access);
        assert_eq!(share_flags(false), 0);
    }

    #[test]
    fn test_wrong_value_kind_is_rejected() {
        let err = SharedFolder::from_row(vec![
            PropertyValue::String("src".into()),
            PropertyValue::Integer(1),
            PropertyValue::Integer(0),
        ])
        .unwrap_err();
        assert!(matches!(err, VmError::Vix(VixError::PropertyType { .. })));
    }
}
