//! Awaitable wrappers around the blocking native waits.
//!
//! VIX only offers a blocking `VixJob_Wait`, so each await moves the wait onto
//! tokio's blocking pool with `spawn_blocking` and suspends the task until the
//! worker finishes. This keeps the scheduler threads free, at the cost of one
//! blocking worker thread per in-flight wait.

use crate::error::{Result, VixError};
use crate::handle::{HandleRef, HandleType};
use crate::job::JobHandle;
use crate::property::{PropertyId, PropertyValue};
use crate::registry::{Process, ProcessRecord};
use std::sync::Arc;
use std::time::Duration;

/// Run a blocking closure on the blocking pool and await its result.
///
/// Panics in the closure are resumed on the awaiting task.
pub(crate) async fn offload<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(VixError::WaitAborted(e.to_string())),
    }
}

/// Await `fut`, giving up locally after `timeout` if one is set.
async fn bounded<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| VixError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Awaitable completion of one job, optionally paired with the process
/// record of the guest process it launched.
///
/// Consumes the job: the handle is released on the worker thread as soon as
/// its results have been read, on success and on error. When a timeout fires
/// the caller stops waiting but the worker keeps the job alive until the
/// native wait returns.
#[derive(Debug)]
pub struct AsyncWaiter {
    job: JobHandle,
    record: Option<Arc<ProcessRecord>>,
    job_timeout: Option<Duration>,
    process_timeout: Option<Duration>,
}

impl AsyncWaiter {
    pub fn new(job: JobHandle) -> Self {
        Self {
            job,
            record: None,
            job_timeout: None,
            process_timeout: None,
        }
    }

    /// Also await the completion of the guest process tracked by `record`.
    pub fn with_record(mut self, record: Arc<ProcessRecord>) -> Self {
        self.record = Some(record);
        self
    }

    /// Give up waiting for the job after `timeout`.
    pub fn job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Give up waiting for the guest process after `timeout`.
    pub fn process_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.process_timeout = timeout;
        self
    }

    /// Await job completion.
    pub async fn wait(self) -> Result<()> {
        self.wait_for(&[]).await.map(|_| ())
    }

    /// Await job completion and read result properties in request order.
    pub async fn wait_for(self, ids: &[PropertyId]) -> Result<Vec<PropertyValue>> {
        let ids = ids.to_vec();
        let job = self.job;
        bounded(self.job_timeout, offload(move || job.wait_for(&ids))).await
    }

    /// Await job completion and read one result property.
    pub async fn wait_one(self, id: PropertyId) -> Result<PropertyValue> {
        let job = self.job;
        bounded(self.job_timeout, offload(move || job.wait_one(id))).await
    }

    /// Await the job and take ownership of its `JOB_RESULT_HANDLE`, which
    /// must be of kind `expected`.
    pub async fn result_handle(self, expected: HandleType) -> Result<HandleRef> {
        let job = self.job;
        bounded(self.job_timeout, offload(move || job.result_handle(expected))).await
    }

    /// Await a list-type job and read all result rows in native order.
    pub async fn rows(self, ids: &[PropertyId]) -> Result<Vec<Vec<PropertyValue>>> {
        let ids = ids.to_vec();
        let job = self.job;
        bounded(self.job_timeout, offload(move || job.rows(&ids))).await
    }

    /// Await a job that must yield exactly one result row.
    pub async fn single_row(self, ids: &[PropertyId]) -> Result<Vec<PropertyValue>> {
        let ids = ids.to_vec();
        let job = self.job;
        bounded(self.job_timeout, offload(move || job.single_row(&ids))).await
    }

    /// Await a guest process launch.
    ///
    /// Waits for the launching job and records the pid it reports. With
    /// `until_exit`, then waits for the process record to complete and
    /// returns its exit code and elapsed time; otherwise returns
    /// [`Process::detached`].
    ///
    /// # Errors
    ///
    /// Returns the launch job's native error, a pid mismatch, the error the
    /// bridge failed the record with, or a timeout.
    pub async fn process(self, until_exit: bool) -> Result<Process> {
        let record = self.record.clone();
        let process_timeout = self.process_timeout;

        let pid_value = self.wait_one(PropertyId::JOB_RESULT_PROCESS_ID).await?;
        let pid = u64::try_from(pid_value.as_i64(PropertyId::JOB_RESULT_PROCESS_ID)?).map_err(
            |_| VixError::PropertyType {
                property: PropertyId::JOB_RESULT_PROCESS_ID,
                expected: crate::property::PropertyKind::Int64,
            },
        )?;

        let Some(record) = record else {
            return Ok(Process::detached(pid));
        };
        record.observe_pid(pid)?;
        tracing::debug!(token = %record.token(), pid, "Guest process started");

        if !until_exit {
            return Ok(Process::detached(pid));
        }
        wait_record(record, process_timeout).await
    }
}

/// Await completion of a process record.
///
/// A timed-out wait leaves the record intact; awaiting it again later still
/// observes the completion.
pub async fn wait_record(record: Arc<ProcessRecord>, timeout: Option<Duration>) -> Result<Process> {
    offload(move || match timeout {
        Some(limit) => record.wait_timeout(limit),
        None => record.wait(),
    })
    .await
}
