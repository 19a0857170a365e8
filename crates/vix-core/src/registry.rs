//! Process registry: correlates native completion callbacks with the guest
//! process launches waiting on them.
//!
//! A [`ProcessRecord`] is registered before the launching native call is
//! issued, and its [`Token`] travels to the native runtime as opaque callback
//! context. The completion bridge later consumes the record with
//! [`ProcessRegistry::lookup_and_remove`] and resolves it exactly once.
//!
//! # Leaks
//!
//! There is no reaper. If the native runtime never delivers the completion
//! for a token, its record stays registered for the life of the registry.
//! Callers that cannot tolerate an unbounded wait should use a timeout.

use crate::error::{Result, VixError, Violation};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Correlation token handed to the native runtime as callback context.
///
/// Tokens are assigned in strictly increasing order and never reused within
/// a registry, so a late callback can never match an unrelated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(u64);

impl Token {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a guest process launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    /// Guest process id.
    pub pid: u64,
    /// Exit code, when the launch waited for the process to finish.
    pub exit_code: Option<i32>,
    /// Wall time the guest process ran for.
    pub elapsed_time: Option<Duration>,
}

impl Process {
    /// A process that was started without waiting for it to exit.
    pub fn detached(pid: u64) -> Self {
        Self {
            pid,
            exit_code: None,
            elapsed_time: None,
        }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Default)]
struct RecordState {
    pid: Option<u64>,
    outcome: Option<Result<Process>>,
}

/// Per-launch state shared between the caller and the completion bridge.
///
/// The outcome is a one-shot cell: set at most once, by the bridge, under the
/// record mutex; every waiter reads it under the same mutex after the condvar
/// fires. Any number of threads may wait, before or after completion.
#[derive(Debug)]
pub struct ProcessRecord {
    token: Token,
    state: Mutex<RecordState>,
    done: Condvar,
}

impl ProcessRecord {
    fn new(token: Token) -> Self {
        Self {
            token,
            state: Mutex::new(RecordState::default()),
            done: Condvar::new(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// The pid observed so far, if any.
    pub fn pid(&self) -> Option<u64> {
        self.state.lock().pid
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// The outcome, if the record has completed.
    pub fn try_result(&self) -> Option<Result<Process>> {
        self.state.lock().outcome.clone()
    }

    /// Record the pid reported by the launching job.
    ///
    /// A pid that differs from one already recorded for this token is a
    /// protocol violation.
    pub fn observe_pid(&self, pid: u64) -> Result<()> {
        let mut state = self.state.lock();
        match state.pid {
            Some(recorded) if recorded != pid => {
                tracing::error!(
                    token = %self.token,
                    recorded,
                    reported = pid,
                    "Launch reported a different pid than the completion"
                );
                Err(Violation::PidMismatch {
                    token: self.token,
                    recorded,
                    reported: pid,
                }
                .into())
            }
            _ => {
                state.pid = Some(pid);
                Ok(())
            }
        }
    }

    /// Store the completion results and wake every waiter.
    ///
    /// Only the completion bridge calls this. A pid that contradicts an
    /// earlier observation fails the record (waiters see the violation rather
    /// than hang); a second completion is rejected without touching the
    /// stored outcome.
    pub(crate) fn resolve(&self, process: Process) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(recorded) = state.pid {
            if recorded != process.pid {
                let violation = Violation::PidMismatch {
                    token: self.token,
                    recorded,
                    reported: process.pid,
                };
                if state.outcome.is_none() {
                    state.outcome = Some(Err(violation.clone().into()));
                    drop(state);
                    self.done.notify_all();
                }
                return Err(violation.into());
            }
        }

        if state.outcome.is_some() {
            return Err(Violation::AlreadyCompleted(self.token).into());
        }

        state.pid = Some(process.pid);
        state.outcome = Some(Ok(process));
        drop(state);
        self.done.notify_all();
        Ok(())
    }

    /// Complete the record with an error so waiters do not block forever.
    pub(crate) fn fail(&self, error: VixError) -> Result<()> {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            return Err(Violation::AlreadyCompleted(self.token).into());
        }
        state.outcome = Some(Err(error));
        drop(state);
        self.done.notify_all();
        Ok(())
    }

    /// Block until the record completes and return its outcome.
    ///
    /// Can be called repeatedly; every call returns the same outcome.
    pub fn wait(&self) -> Result<Process> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.done.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// A timed-out wait leaves the record untouched; a later wait still
    /// observes the completion.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Process> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            if self.done.wait_until(&mut state, deadline).timed_out() {
                if let Some(outcome) = &state.outcome {
                    return outcome.clone();
                }
                tracing::debug!(token = %self.token, ?timeout, "Process wait timed out");
                return Err(VixError::Timeout(timeout));
            }
        }
    }
}

#[derive(Debug)]
struct RegistryInner {
    next_token: u64,
    records: HashMap<Token, Arc<ProcessRecord>>,
}

/// Table of in-flight guest process launches, keyed by [`Token`].
///
/// Owned explicitly and shared by `Arc` with whatever installs the native
/// callback; each registry is independent. Every operation takes the single
/// table lock for its whole duration and never blocks while holding it.
#[derive(Debug)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_token: 1,
                records: HashMap::new(),
            }),
        }
    }

    /// Allocate a fresh token and insert an empty record for it.
    ///
    /// Must happen before the native call that can complete the record is
    /// issued.
    pub fn register(&self) -> (Token, Arc<ProcessRecord>) {
        let mut inner = self.inner.lock();
        let token = Token(inner.next_token);
        inner.next_token += 1;

        let record = Arc::new(ProcessRecord::new(token));
        inner.records.insert(token, Arc::clone(&record));
        let pending = inner.records.len();
        drop(inner);

        tracing::debug!(%token, pending, "Registered process record");
        (token, record)
    }

    /// Remove and return the record for `token`, for one-time consumption.
    ///
    /// An unknown token means the native runtime completed something twice
    /// or completed something never registered.
    pub fn lookup_and_remove(&self, token: Token) -> Result<Arc<ProcessRecord>> {
        let removed = self.inner.lock().records.remove(&token);
        match removed {
            Some(record) => {
                tracing::debug!(%token, "Consumed process record");
                Ok(record)
            }
            None => {
                tracing::error!(%token, "Completion for unknown process token");
                Err(Violation::UnknownToken(token).into())
            }
        }
    }

    /// Peek at a registered record without consuming it.
    pub fn lookup(&self, token: Token) -> Option<Arc<ProcessRecord>> {
        self.inner.lock().records.get(&token).cloned()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.inner.lock().records.contains_key(&token)
    }

    /// Number of records still awaiting completion.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put a consumed record back under its token. Fault injection only.
    #[cfg(test)]
    pub(crate) fn reinsert(&self, record: Arc<ProcessRecord>) {
        self.inner.lock().records.insert(record.token(), record);
    }
}
