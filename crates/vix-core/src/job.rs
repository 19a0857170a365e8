//! Job handles: outstanding or completed asynchronous native operations.

use crate::error::{ErrorCode, Result, Violation};
use crate::handle::{HandleRef, HandleType, RawHandle};
use crate::native::{NativeApi, Operation, Subscription};
use crate::property::{PropertyId, PropertyValue};
use std::sync::Arc;

/// A handle to a VIX job.
///
/// Result properties are only meaningful once the job is done, so every
/// result accessor performs a blocking wait first. The handle is released
/// when the `JobHandle` is dropped, whether the job succeeded or not.
#[derive(Debug)]
pub struct JobHandle {
    handle: HandleRef,
}

impl JobHandle {
    /// Take ownership of a raw job handle.
    pub fn acquire(api: Arc<dyn NativeApi>, raw: RawHandle) -> Result<Self> {
        Self::from_handle(HandleRef::acquire(api, raw, HandleType::Job)?)
    }

    /// Wrap an already-owned handle, checking that it is a job.
    pub fn from_handle(handle: HandleRef) -> Result<Self> {
        let actual = handle.handle_type()?;
        if actual != HandleType::Job {
            return Err(crate::VixError::TypeMismatch {
                expected: HandleType::Job,
                actual,
            });
        }
        Ok(Self { handle })
    }

    /// Issue `op` against `target` and wrap the returned job.
    pub fn issue(
        target: &HandleRef,
        op: &Operation,
        events: Option<Subscription>,
    ) -> Result<Self> {
        let target_raw = target.raw()?;
        Self::issue_raw(target.api().clone(), target_raw, op, events)
    }

    /// Issue `op` against a raw target handle.
    pub fn issue_raw(
        api: Arc<dyn NativeApi>,
        target: RawHandle,
        op: &Operation,
        events: Option<Subscription>,
    ) -> Result<Self> {
        tracing::debug!(
            op = op.name(),
            target = %target,
            token = ?events.as_ref().map(|s| s.token),
            "Issuing native operation"
        );
        let raw = api.issue(target, op, events).map_err(|code| {
            tracing::warn!(op = op.name(), error = %code, "Native operation not started");
            code
        })?;
        Self::acquire(api, raw)
    }

    pub fn handle(&self) -> &HandleRef {
        &self.handle
    }

    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    /// Block until the job is done.
    pub fn wait(&self) -> Result<()> {
        self.wait_for(&[]).map(|_| ())
    }

    /// Block until the job is done, then read result properties in the
    /// requested order with one native round-trip.
    pub fn wait_for(&self, ids: &[PropertyId]) -> Result<Vec<PropertyValue>> {
        let raw = self.handle.raw()?;
        tracing::debug!(job = %raw, ?ids, "Waiting for job");
        let values = self.handle.api().job_wait(raw, ids).map_err(|code| {
            tracing::debug!(job = %raw, error = %code, "Job failed");
            code
        })?;
        tracing::trace!(job = %raw, ?values, "Job results");
        Ok(values)
    }

    /// Wait and read a single result property.
    pub fn wait_one(&self, id: PropertyId) -> Result<PropertyValue> {
        let mut values = self.wait_for(&[id])?;
        values.pop().ok_or_else(|| {
            Violation::UnexpectedRowCount {
                expected: 1,
                actual: 0,
            }
            .into()
        })
    }

    /// Wait and take ownership of the job's result handle, checking its kind.
    pub fn result_handle(&self, expected: HandleType) -> Result<HandleRef> {
        let value = self.wait_one(PropertyId::JOB_RESULT_HANDLE)?;
        let raw = value.as_handle(PropertyId::JOB_RESULT_HANDLE)?;
        HandleRef::acquire(self.handle.api().clone(), raw, expected)
    }

    /// Wait and read every result row of a list-type job, in native order.
    ///
    /// The row count is taken from `ids[0]`.
    pub fn rows(&self, ids: &[PropertyId]) -> Result<Vec<Vec<PropertyValue>>> {
        self.wait()?;
        let raw = self.handle.raw()?;
        let Some(first) = ids.first() else {
            return Ok(Vec::new());
        };

        let api = self.handle.api();
        let count = api.job_num_rows(raw, *first);
        tracing::debug!(job = %raw, count, "Reading job result rows");

        let mut rows = Vec::with_capacity(count);
        for index in 0..count {
            rows.push(api.job_nth_row(raw, index, ids)?);
        }
        Ok(rows)
    }

    /// Like [`rows`](Self::rows) but for jobs that must yield exactly one row.
    pub fn single_row(&self, ids: &[PropertyId]) -> Result<Vec<PropertyValue>> {
        let mut rows = self.rows(ids)?;
        if rows.len() != 1 {
            tracing::warn!(
                job = %self.handle.raw()?,
                rows = rows.len(),
                "Single-result job returned unexpected row count"
            );
            return Err(Violation::UnexpectedRowCount {
                expected: 1,
                actual: rows.len(),
            }
            .into());
        }
        Ok(rows.remove(0))
    }

    /// Non-blocking completion check.
    pub fn is_done(&self) -> Result<bool> {
        let raw = self.handle.raw()?;
        Ok(self.handle.api().job_check_completion(raw)?)
    }

    /// The job's error code. `ErrorCode::OK` while pending or on success.
    pub fn error(&self) -> Result<ErrorCode> {
        let raw = self.handle.raw()?;
        Ok(self.handle.api().job_error(raw))
    }

    /// Release the job handle now.
    pub fn release(mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VixError;
    use crate::sim::SimRuntime;

    fn sim() -> (Arc<SimRuntime>, Arc<dyn NativeApi>) {
        let sim = Arc::new(SimRuntime::new());
        let api: Arc<dyn NativeApi> = sim.clone();
        (sim, api)
    }

    #[test]
    fn test_wait_for_preserves_request_order() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![
            (PropertyId::JOB_RESULT_PROCESS_ID, PropertyValue::Int64(77)),
            (
                PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
                PropertyValue::Integer(3),
            ),
        ]);
        let job = JobHandle::acquire(api, raw).unwrap();
        let values = job
            .wait_for(&[
                PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
                PropertyId::JOB_RESULT_PROCESS_ID,
            ])
            .unwrap();
        assert_eq!(
            values,
            vec![PropertyValue::Integer(3), PropertyValue::Int64(77)]
        );
    }

    #[test]
    fn test_failed_job_surfaces_native_error() {
        let (sim, api) = sim();
        let raw = sim.failed_job(ErrorCode::VM_NOT_RUNNING);
        let job = JobHandle::acquire(api, raw).unwrap();
        assert_eq!(job.wait(), Err(VixError::Native(ErrorCode::VM_NOT_RUNNING)));
        assert_eq!(job.error().unwrap(), ErrorCode::VM_NOT_RUNNING);
        drop(job);
        assert_eq!(sim.refcount(raw), 0);
    }

    #[test]
    fn test_acquire_rejects_non_job() {
        let (sim, api) = sim();
        let vm = sim.add_vm(crate::sim::SimVm::new("/vms/a.vmx"));
        let err = JobHandle::acquire(api, vm).unwrap_err();
        assert!(matches!(
            err,
            VixError::TypeMismatch {
                expected: HandleType::Job,
                actual: HandleType::Vm
            }
        ));
    }

    #[test]
    fn test_rows_keep_native_order() {
        let (sim, api) = sim();
        let rows = vec![
            vec![(PropertyId::JOB_RESULT_ITEM_NAME, PropertyValue::String("zeta".into()))],
            vec![(PropertyId::JOB_RESULT_ITEM_NAME, PropertyValue::String("alpha".into()))],
            vec![(PropertyId::JOB_RESULT_ITEM_NAME, PropertyValue::String("mid".into()))],
        ];
        let raw = sim.completed_list_job(rows);
        let job = JobHandle::acquire(api, raw).unwrap();
        let names: Vec<String> = job
            .rows(&[PropertyId::JOB_RESULT_ITEM_NAME])
            .unwrap()
            .into_iter()
            .map(|mut row| row.remove(0).into_string(PropertyId::JOB_RESULT_ITEM_NAME).unwrap())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_single_row_rejects_multiple_rows() {
        let (sim, api) = sim();
        let row = vec![(PropertyId::JOB_RESULT_ITEM_NAME, PropertyValue::String("a".into()))];
        let raw = sim.completed_list_job(vec![row.clone(), row]);
        let job = JobHandle::acquire(api, raw).unwrap();
        assert_eq!(
            job.single_row(&[PropertyId::JOB_RESULT_ITEM_NAME]),
            Err(VixError::ProtocolViolation(Violation::UnexpectedRowCount {
                expected: 1,
                actual: 2
            }))
        );
    }

    #[test]
    fn test_result_handle_checks_kind() {
        let (sim, api) = sim();
        let vm = sim.add_vm(crate::sim::SimVm::new("/vms/a.vmx"));
        // One reference per job below; the mismatched one gives its back
        sim.add_ref(vm);
        let result = vec![(PropertyId::JOB_RESULT_HANDLE, PropertyValue::Handle(vm))];

        let job = JobHandle::acquire(api.clone(), sim.completed_job(result.clone())).unwrap();
        assert_eq!(
            job.result_handle(HandleType::Host).unwrap_err(),
            VixError::TypeMismatch {
                expected: HandleType::Host,
                actual: HandleType::Vm
            }
        );
        assert_eq!(sim.refcount(vm), 1);

        let job = JobHandle::acquire(api, sim.completed_job(result)).unwrap();
        let handle = job.result_handle(HandleType::Vm).unwrap();
        assert_eq!(handle.raw().unwrap(), vm);
    }

    #[test]
    fn test_is_done_tracks_completion() {
        let (sim, api) = sim();
        let raw = sim.pending_job();
        let job = JobHandle::acquire(api, raw).unwrap();
        assert!(!job.is_done().unwrap());
        assert_eq!(job.error().unwrap(), ErrorCode::OK);
        sim.finish_job(raw, vec![]);
        assert!(job.is_done().unwrap());
    }

    #[test]
    fn test_issue_failure_creates_no_job() {
        let (sim, api) = sim();
        let vm = sim.add_vm(crate::sim::SimVm::new("/vms/a.vmx").powered_on());
        let before = sim.live_handles();
        let op = Operation::RunProgramInGuest {
            program: "/bin/\0true".into(),
            args: None,
            options: 0,
        };
        let err = JobHandle::issue_raw(api, vm, &op, None).unwrap_err();
        assert_eq!(err, VixError::Native(ErrorCode::INVALID_ARG));
        assert_eq!(sim.live_handles(), before);
    }

    #[test]
    fn test_wrapping_released_handle_fails() {
        let (sim, api) = sim();
        let raw = sim.completed_job(vec![]);
        let mut handle = HandleRef::acquire(api, raw, HandleType::Job).unwrap();
        handle.release();
        assert_eq!(
            JobHandle::from_handle(handle).unwrap_err(),
            VixError::UseAfterRelease(raw)
        );
    }
}
