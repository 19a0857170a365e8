//! Completion bridge: the native callback entry point for guest process jobs.
//!
//! The native runtime calls [`CompletionBridge::on_event`] on one of its own
//! threads. For a completion event the bridge consumes the matching
//! [`ProcessRecord`](crate::registry::ProcessRecord), reads the process
//! results from the event handle and resolves the record, which wakes every
//! waiter.
//!
//! ```text
//!   Registered ──(JOB_COMPLETED)──▶ Completed
//!       │
//!       └──(JOB_PROGRESS)──▶ Registered
//! ```

use crate::config::ElapsedUnit;
use crate::error::{Result, VixError, Violation};
use crate::handle::{HandleRef, RawHandle};
use crate::native::{EventSink, EventType, NativeApi, Subscription};
use crate::property::{PropertyId, PropertyKind, PropertyValue};
use crate::registry::{Process, ProcessRecord, ProcessRegistry, Token};
use std::sync::Arc;

/// Properties read from the event handle when a guest process completes.
const COMPLETION_PROPERTIES: [PropertyId; 3] = [
    PropertyId::JOB_RESULT_PROCESS_ID,
    PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
    PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME,
];

/// What the bridge did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Progress event, accepted without a state change.
    Progress,
    /// The record for this token was resolved.
    Completed(Token),
}

/// Routes native job events to the process records awaiting them.
pub struct CompletionBridge {
    api: Arc<dyn NativeApi>,
    registry: Arc<ProcessRegistry>,
    elapsed_unit: ElapsedUnit,
}

impl CompletionBridge {
    pub fn new(
        api: Arc<dyn NativeApi>,
        registry: Arc<ProcessRegistry>,
        elapsed_unit: ElapsedUnit,
    ) -> Self {
        Self {
            api,
            registry,
            elapsed_unit,
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// A callback registration that routes events for `token` to this bridge.
    pub fn subscribe(self: &Arc<Self>, token: Token) -> Subscription {
        Subscription::new(Arc::clone(self) as Arc<dyn EventSink>, token)
    }

    /// Process one native event.
    ///
    /// Errors are protocol violations or native failures while reading the
    /// results. In every error case where a record was consumed, that record
    /// is failed so its waiters return instead of blocking forever.
    pub fn handle_event(
        &self,
        handle: RawHandle,
        event: EventType,
        token: Token,
    ) -> Result<Disposition> {
        match event {
            EventType::JOB_PROGRESS => {
                tracing::trace!(%token, job = %handle, "Job progress");
                Ok(Disposition::Progress)
            }
            EventType::JOB_COMPLETED => self.complete(handle, token),
            EventType(other) => {
                tracing::error!(%token, job = %handle, event = other, "Unexpected job event type");
                Err(Violation::UnexpectedEvent(other).into())
            }
        }
    }

    fn complete(&self, handle: RawHandle, token: Token) -> Result<Disposition> {
        let record = self.registry.lookup_and_remove(token)?;

        // The runtime only lends us the handle for the duration of the call
        let fetched = {
            let handle = HandleRef::retain(Arc::clone(&self.api), handle);
            handle.get_properties(&COMPLETION_PROPERTIES)
        };

        let process = match fetched.and_then(|values| self.decode(values)) {
            Ok(process) => process,
            Err(e) => {
                tracing::warn!(%token, job = %handle, error = %e, "Failed to read process results");
                Self::fail(&record, e.clone());
                return Err(e);
            }
        };

        record.resolve(process.clone()).inspect_err(|e| {
            tracing::error!(%token, error = %e, "Rejected process completion");
        })?;

        tracing::debug!(
            %token,
            pid = process.pid,
            exit_code = ?process.exit_code,
            elapsed = ?process.elapsed_time,
            "Process completed"
        );
        Ok(Disposition::Completed(token))
    }

    fn fail(record: &ProcessRecord, error: VixError) {
        if let Err(e) = record.fail(error) {
            tracing::error!(token = %record.token(), error = %e, "Could not fail process record");
        }
    }

    fn decode(&self, values: Vec<PropertyValue>) -> Result<Process> {
        let [pid, exit_code, elapsed]: [PropertyValue; 3] =
            values.try_into().map_err(|values: Vec<PropertyValue>| {
                VixError::from(Violation::UnexpectedRowCount {
                    expected: COMPLETION_PROPERTIES.len(),
                    actual: values.len(),
                })
            })?;

        let pid_id = PropertyId::JOB_RESULT_PROCESS_ID;
        let pid = u64::try_from(pid.as_i64(pid_id)?).map_err(|_| VixError::PropertyType {
            property: pid_id,
            expected: PropertyKind::Int64,
        })?;

        let exit_id = PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE;
        let exit_code =
            i32::try_from(exit_code.as_i64(exit_id)?).map_err(|_| VixError::PropertyType {
                property: exit_id,
                expected: PropertyKind::Integer,
            })?;

        let elapsed = elapsed.as_i64(PropertyId::JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME)?;

        Ok(Process {
            pid,
            exit_code: Some(exit_code),
            elapsed_time: Some(self.elapsed_unit.to_duration(elapsed)),
        })
    }
}

impl EventSink for CompletionBridge {
    fn on_event(&self, handle: RawHandle, event: EventType, token: Token) {
        if let Err(e) = self.handle_event(handle, event, token) {
            tracing::error!(%token, %event, error = %e, "Job event handling failed");
        }
    }
}
