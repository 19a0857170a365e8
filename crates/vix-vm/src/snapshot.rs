//! Snapshot handles.

use crate::error::Result;
use crate::power::PowerState;
use vix_core::{Countable, Derivation, HandleRef, HandleType, PropertyId};

/// A VM snapshot. Released when dropped.
#[derive(Debug)]
pub struct Snapshot {
    handle: HandleRef,
}

impl Snapshot {
    pub(crate) fn new(handle: HandleRef) -> Self {
        Self { handle }
    }

    /// Take a snapshot handle derived from `parent`.
    pub(crate) fn derive(parent: &HandleRef, derivation: Derivation) -> Result<Self> {
        let api = parent.api().clone();
        let raw = api
            .derive(parent.raw()?, &derivation)
            .map_err(vix_core::VixError::from)?;
        tracing::debug!(parent = %parent.raw()?, ?derivation, snapshot = %raw, "Derived snapshot");
        Ok(Self::new(HandleRef::acquire(api, raw, HandleType::Snapshot)?))
    }

    pub fn handle(&self) -> &HandleRef {
        &self.handle
    }

    pub fn name(&self) -> Result<String> {
        Ok(self
            .handle
            .get_property(PropertyId::SNAPSHOT_DISPLAYNAME)?
            .into_string(PropertyId::SNAPSHOT_DISPLAYNAME)?)
    }

    pub fn description(&self) -> Result<String> {
        Ok(self
            .handle
            .get_property(PropertyId::SNAPSHOT_DESCRIPTION)?
            .into_string(PropertyId::SNAPSHOT_DESCRIPTION)?)
    }

    /// Power state the VM was in when the snapshot was taken.
    pub fn power_state(&self) -> Result<PowerState> {
        let raw = self
            .handle
            .get_property(PropertyId::SNAPSHOT_POWERSTATE)?
            .as_i32(PropertyId::SNAPSHOT_POWERSTATE)?;
        Ok(PowerState(raw))
    }

    pub fn num_children(&self) -> Result<usize> {
        let api = self.handle.api();
        Ok(api
            .count(self.handle.raw()?, Countable::SnapshotChildren)
            .map_err(vix_core::VixError::from)?)
    }

    pub fn child(&self, index: usize) -> Result<Snapshot> {
        Self::derive(&self.handle, Derivation::SnapshotChild(index))
    }

    /// The parent snapshot. Fails with `VIX_E_NOT_FOUND` for a root.
    pub fn parent(&self) -> Result<Snapshot> {
        Self::derive(&self.handle, Derivation::SnapshotParent)
    }

    /// Release the snapshot handle now.
    pub fn release(mut self) {
        self.handle.release();
    }
}
