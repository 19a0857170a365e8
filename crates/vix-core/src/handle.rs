//! Owned wrapper around native VIX handles.

use crate::error::{Result, VixError};
use crate::native::NativeApi;
use crate::property::{PropertyId, PropertyValue};
use std::fmt;
use std::sync::Arc;

/// A raw `VixHandle` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub i32);

impl RawHandle {
    /// `VIX_INVALID_HANDLE`.
    pub const INVALID: RawHandle = RawHandle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of resource a handle refers to (`VIX_HANDLETYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    None,
    MetadataContainer,
    Host,
    Vm,
    Network,
    Job,
    Snapshot,
    PropertyList,
    Unknown(i32),
}

impl HandleType {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => HandleType::None,
            1 => HandleType::MetadataContainer,
            2 => HandleType::Host,
            3 => HandleType::Vm,
            5 => HandleType::Network,
            6 => HandleType::Job,
            7 => HandleType::Snapshot,
            9 => HandleType::PropertyList,
            other => HandleType::Unknown(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            HandleType::None => 0,
            HandleType::MetadataContainer => 1,
            HandleType::Host => 2,
            HandleType::Vm => 3,
            HandleType::Network => 5,
            HandleType::Job => 6,
            HandleType::Snapshot => 7,
            HandleType::PropertyList => 9,
            HandleType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleType::None => write!(f, "none"),
            HandleType::MetadataContainer => write!(f, "metadata-container"),
            HandleType::Host => write!(f, "host"),
            HandleType::Vm => write!(f, "vm"),
            HandleType::Network => write!(f, "network"),
            HandleType::Job => write!(f, "job"),
            HandleType::Snapshot => write!(f, "snapshot"),
            HandleType::PropertyList => write!(f, "property-list"),
            HandleType::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// An owned reference to a native handle.
///
/// Holds exactly one native reference and gives it back exactly once, either
/// through [`release`](Self::release) or on drop. After release every
/// operation fails with [`VixError::UseAfterRelease`].
///
/// Releasing is not synchronized against native work still using the handle;
/// keep the owner alive until dependent jobs and their callbacks are done.
pub struct HandleRef {
    api: Arc<dyn NativeApi>,
    raw: RawHandle,
    released: bool,
}

impl HandleRef {
    /// Take ownership of `raw`, checking that it is of kind `expected`.
    ///
    /// On a kind mismatch the reference is released before the error is
    /// returned, so the caller never leaks it.
    pub fn acquire(api: Arc<dyn NativeApi>, raw: RawHandle, expected: HandleType) -> Result<Self> {
        let handle = Self::acquire_any(api, raw);
        let actual = handle.api.handle_type(raw);
        if actual != expected {
            tracing::debug!(handle = %raw, %expected, %actual, "Handle type mismatch");
            // `handle` drops here and gives the reference back
            return Err(VixError::TypeMismatch { expected, actual });
        }
        Ok(handle)
    }

    /// Take ownership of `raw` without a kind check.
    pub fn acquire_any(api: Arc<dyn NativeApi>, raw: RawHandle) -> Self {
        Self {
            api,
            raw,
            released: false,
        }
    }

    /// Add a native reference to a borrowed handle and own that reference.
    pub fn retain(api: Arc<dyn NativeApi>, raw: RawHandle) -> Self {
        api.add_ref(raw);
        Self::acquire_any(api, raw)
    }

    /// The raw identifier, if still owned.
    pub fn raw(&self) -> Result<RawHandle> {
        if self.released {
            return Err(VixError::UseAfterRelease(self.raw));
        }
        Ok(self.raw)
    }

    pub fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn handle_type(&self) -> Result<HandleType> {
        Ok(self.api.handle_type(self.raw()?))
    }

    /// Fetch several properties in one native round-trip, in request order.
    pub fn get_properties(&self, ids: &[PropertyId]) -> Result<Vec<PropertyValue>> {
        let raw = self.raw()?;
        tracing::trace!(handle = %raw, ?ids, "Getting properties");
        let values = self.api.get_properties(raw, ids)?;
        Ok(values)
    }

    /// Fetch a single property.
    pub fn get_property(&self, id: PropertyId) -> Result<PropertyValue> {
        let mut values = self.get_properties(&[id])?;
        values
            .pop()
            .ok_or(VixError::Native(crate::error::ErrorCode::FAIL))
    }

    /// Give the native reference back. Calling this again is a no-op.
    pub fn release(&mut self) {
        if self.released {
            tracing::trace!(handle = %self.raw, "Handle already released");
            return;
        }
        self.released = true;
        tracing::trace!(handle = %self.raw, "Releasing handle");
        self.api.release(self.raw);
    }

    /// Transfer the native reference to the caller without releasing it.
    pub fn into_raw(mut self) -> Result<RawHandle> {
        let raw = self.raw()?;
        self.released = true;
        Ok(raw)
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRef")
            .field("raw", &self.raw)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRuntime;

    fn sim() -> (Arc<SimRuntime>, Arc<dyn NativeApi>) {
        let sim = Arc::new(SimRuntime::new());
        let api: Arc<dyn NativeApi> = sim.clone();
        (sim, api)
    }

    #[test]
    fn test_handle_type_round_trip() {
        for raw in [0, 1, 2, 3, 5, 6, 7, 9, 42] {
            assert_eq!(HandleType::from_raw(raw).raw(), raw);
        }
    }

    #[test]
    fn test_acquire_checks_kind_and_releases_on_mismatch() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![]);
        let err = HandleRef::acquire(api, raw, HandleType::Vm).unwrap_err();
        assert_eq!(
            err,
            VixError::TypeMismatch {
                expected: HandleType::Vm,
                actual: HandleType::Job
            }
        );
        assert_eq!(sim.refcount(raw), 0);
    }

    #[test]
    fn test_drop_releases_once() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![]);
        {
            let mut handle = HandleRef::acquire(api, raw, HandleType::Job).unwrap();
            handle.release();
            handle.release();
        }
        assert_eq!(sim.refcount(raw), 0);
        assert_eq!(sim.double_releases(), 0);
    }

    #[test]
    fn test_released_handle_rejects_use() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![]);
        let mut handle = HandleRef::acquire(api, raw, HandleType::Job).unwrap();
        handle.release();

        assert_eq!(handle.raw(), Err(VixError::UseAfterRelease(raw)));
        assert_eq!(handle.handle_type(), Err(VixError::UseAfterRelease(raw)));
        assert_eq!(
            handle.get_properties(&[PropertyId::JOB_RESULT_PROCESS_ID]),
            Err(VixError::UseAfterRelease(raw))
        );
        assert_eq!(
            handle.get_property(PropertyId::JOB_RESULT_PROCESS_ID),
            Err(VixError::UseAfterRelease(raw))
        );
    }

    #[test]
    fn test_retain_adds_reference() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![]);
        let owner = HandleRef::acquire_any(api.clone(), raw);
        let borrowed = HandleRef::retain(api, raw);
        assert_eq!(sim.refcount(raw), 2);
        drop(borrowed);
        assert_eq!(sim.refcount(raw), 1);
        drop(owner);
        assert_eq!(sim.refcount(raw), 0);
    }

    #[test]
    fn test_into_raw_transfers_ownership() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![]);
        let handle = HandleRef::acquire_any(api.clone(), raw);
        let taken = handle.into_raw().unwrap();
        assert_eq!(taken, raw);
        assert_eq!(sim.refcount(raw), 1);
        api.release(raw);
    }
}
