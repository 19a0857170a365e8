//! Session: the native API together with its process registry and bridge.

use crate::bridge::CompletionBridge;
use crate::config::BridgeConfig;
use crate::error::{Result, VixError};
use crate::handle::{HandleRef, RawHandle};
use crate::job::JobHandle;
use crate::native::{NativeApi, Operation};
use crate::registry::{ProcessRecord, ProcessRegistry};
use crate::waiter::AsyncWaiter;
use std::sync::Arc;

/// Everything needed to issue native operations and await their results.
///
/// Cheap to clone. Each session created with [`Session::new`] owns a fresh
/// registry, so independent sessions never see each other's tokens.
#[derive(Clone)]
pub struct Session {
    api: Arc<dyn NativeApi>,
    registry: Arc<ProcessRegistry>,
    bridge: Arc<CompletionBridge>,
    config: BridgeConfig,
}

impl Session {
    pub fn new(api: Arc<dyn NativeApi>, config: BridgeConfig) -> Self {
        Self::with_registry(api, Arc::new(ProcessRegistry::new()), config)
    }

    /// Build a session around an existing registry.
    pub fn with_registry(
        api: Arc<dyn NativeApi>,
        registry: Arc<ProcessRegistry>,
        config: BridgeConfig,
    ) -> Self {
        let bridge = Arc::new(CompletionBridge::new(
            Arc::clone(&api),
            Arc::clone(&registry),
            config.elapsed_unit,
        ));
        Self {
            api,
            registry,
            bridge,
            config,
        }
    }

    pub fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<CompletionBridge> {
        &self.bridge
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Issue an operation that needs no completion callback.
    pub fn issue(&self, target: &HandleRef, op: &Operation) -> Result<JobHandle> {
        JobHandle::issue(target, op, None)
    }

    /// Issue an operation against a raw target, e.g. `RawHandle::INVALID`
    /// for host connection.
    pub fn issue_raw(&self, target: RawHandle, op: &Operation) -> Result<JobHandle> {
        JobHandle::issue_raw(Arc::clone(&self.api), target, op, None)
    }

    /// Issue a guest process launch with completion tracking.
    ///
    /// The record is registered before the native call is made, so the
    /// completion callback can never arrive for a token that does not exist
    /// yet. If the call cannot be made, the record is removed again.
    pub fn issue_tracked(
        &self,
        target: &HandleRef,
        op: &Operation,
    ) -> Result<(JobHandle, Arc<ProcessRecord>)> {
        if !op.launches_process() {
            return Err(VixError::NotALaunch(op.name()));
        }
        // Fail on a released target before a record is created for it
        target.raw()?;
        let (token, record) = self.registry.register();
        match JobHandle::issue(target, op, Some(self.bridge.subscribe(token))) {
            Ok(job) => Ok((job, record)),
            Err(e) => {
                // No job, so no completion will ever arrive for this token
                if self.registry.lookup_and_remove(token).is_err() {
                    tracing::warn!(%token, "Record of a failed launch was already gone");
                }
                Err(e)
            }
        }
    }

    /// Wrap a job in an [`AsyncWaiter`] carrying this session's timeouts.
    pub fn waiter(&self, job: JobHandle) -> AsyncWaiter {
        AsyncWaiter::new(job)
            .job_timeout(self.config.job_timeout)
            .process_timeout(self.config.process_timeout)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pending", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::handle::HandleType;
    use crate::sim::{SimProgram, SimRuntime, SimVm};

    fn session_with_vm() -> (Session, HandleRef) {
        let sim = Arc::new(SimRuntime::new());
        let vm = sim.add_vm(
            SimVm::new("/vms/a.vmx")
                .powered_on()
                .program("/bin/true", SimProgram::new(0)),
        );
        let session = Session::new(sim, BridgeConfig::default());
        let vm = HandleRef::acquire(session.api().clone(), vm, HandleType::Vm).unwrap();
        (session, vm)
    }

    #[test]
    fn test_failed_launch_leaves_no_record() {
        let (session, vm) = session_with_vm();
        let run = Operation::RunProgramInGuest {
            program: "/bin/true".into(),
            args: Some("a\0b".into()),
            options: 0,
        };
        let err = session.issue_tracked(&vm, &run).unwrap_err();
        assert_eq!(err, VixError::Native(ErrorCode::INVALID_ARG));
        assert!(session.registry().is_empty());
    }

    #[test]
    fn test_tracked_issue_requires_a_launch() {
        let (session, vm) = session_with_vm();
        let err = session
            .issue_tracked(&vm, &Operation::PowerOn { options: 0 })
            .unwrap_err();
        assert_eq!(err, VixError::NotALaunch("power_on"));
        assert!(session.registry().is_empty());
    }

    #[tokio::test]
    async fn test_tracked_launch_completes_and_unregisters() {
        let (session, vm) = session_with_vm();
        let run = Operation::RunProgramInGuest {
            program: "/bin/true".into(),
            args: None,
            options: 0,
        };
        let (job, record) = session.issue_tracked(&vm, &run).unwrap();
        assert_eq!(session.registry().len(), 1);
        let process = session.waiter(job).with_record(record).process(true).await.unwrap();
        assert_eq!(process.exit_code, Some(0));
        assert!(session.registry().is_empty());
    }
}
