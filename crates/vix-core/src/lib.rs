//! # vix-core
//!
//! Handle, job and completion-bridge core for the VMware VIX API.
//!
//! VIX reports the end of a guest process through a callback invoked on one of
//! the library's own threads. This crate turns that callback into a value an
//! async task can await, and wraps native handles so they are released exactly
//! once.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      vix-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │    Session      │────▶│  ProcessRegistry         │    │
//! │  │ - issue()       │     │  Token ─▶ ProcessRecord  │    │
//! │  │ - issue_tracked │     └──────────────────────────┘    │
//! │  └─────────────────┘                  ▲                  │
//! │           │                           │ lookup_and_remove│
//! │           ▼                           │                  │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │  AsyncWaiter    │     │   CompletionBridge       │    │
//! │  │ (spawn_blocking)│     │   (native callback)      │    │
//! │  └─────────────────┘     └──────────────────────────┘    │
//! │           │                           ▲                  │
//! │           ▼                           │ events           │
//! │  ┌──────────────────────────────────────────────────┐    │
//! │  │  NativeApi: VixLibrary (ffi) | SimRuntime (sim)  │    │
//! │  └──────────────────────────────────────────────────┘    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vix_core::{BridgeConfig, Operation, Session};
//! use vix_core::sim::{SimProgram, SimRuntime, SimVm};
//!
//! # async fn example() -> vix_core::Result<()> {
//! let sim = Arc::new(SimRuntime::new());
//! let vm = sim.add_vm(
//!     SimVm::new("/vms/dev.vmx")
//!         .powered_on()
//!         .program("/bin/true", SimProgram::new(0)),
//! );
//! let session = Session::new(sim.clone(), BridgeConfig::default());
//! let vm = vix_core::HandleRef::acquire(session.api().clone(), vm, vix_core::HandleType::Vm)?;
//!
//! let run = Operation::RunProgramInGuest {
//!     program: "/bin/true".into(),
//!     args: None,
//!     options: 0,
//! };
//! let (job, record) = session.issue_tracked(&vm, &run)?;
//! let process = session.waiter(job).with_record(record).process(true).await?;
//! println!("pid {} exited with {:?}", process.pid, process.exit_code);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Owned Handles**: `HandleRef` releases its native reference exactly once
//! - **Completion Bridge**: Callback events resolve per-process records
//! - **Async Waits**: Blocking native waits offloaded to tokio's blocking pool
//! - **Simulator**: In-process `NativeApi` for tests and dry runs
//! - **`vix-ffi`**: Binding to `libvixAllProducts`

mod bridge;
mod config;
mod error;
mod handle;
mod job;
pub mod native;
mod property;
mod registry;
mod session;
pub mod sim;
mod waiter;

#[cfg(feature = "vix-ffi")]
pub mod ffi;

pub use bridge::{CompletionBridge, Disposition};
pub use config::{BridgeConfig, ElapsedUnit};
pub use error::{ErrorCode, Result, Violation, VixError};
pub use handle::{HandleRef, HandleType, RawHandle};
pub use job::JobHandle;
pub use native::{
    Countable, Derivation, EventSink, EventType, NativeApi, Operation, ServiceProvider,
    Subscription,
};
pub use property::{PropertyId, PropertyKind, PropertyValue};
pub use registry::{Process, ProcessRecord, ProcessRegistry, Token};
pub use session::Session;
pub use waiter::{wait_record, AsyncWaiter};
