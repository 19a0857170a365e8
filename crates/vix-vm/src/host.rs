//! Host connections.

use crate::error::{Result, VmError};
use crate::vm::VirtualMachine;
use std::sync::Arc;
use vix_core::{HandleRef, HandleType, Operation, RawHandle, ServiceProvider, Session};

/// Parameters for [`Host::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub provider: ServiceProvider,
    /// Remote host name; `None` connects to the local host.
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            provider: ServiceProvider::Workstation,
            host: None,
            port: 0,
            user: None,
            password: None,
        }
    }
}

impl ConnectOptions {
    pub fn provider(mut self, provider: ServiceProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    fn operation(&self) -> Operation {
        Operation::Connect {
            provider: self.provider,
            host: self.host.clone(),
            port: i32::from(self.port),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// A connection to a VIX host.
///
/// VMs opened through a host keep the connection alive, so the `Host` may be
/// dropped while they are in use.
#[derive(Debug)]
pub struct Host {
    session: Session,
    handle: Arc<HandleRef>,
}

impl Host {
    /// Connect to a host.
    pub async fn connect(session: Session, options: ConnectOptions) -> Result<Self> {
        tracing::info!(
            provider = ?options.provider,
            host = options.host.as_deref().unwrap_or("localhost"),
            "Connecting to VIX host"
        );
        let job = session.issue_raw(RawHandle::INVALID, &options.operation())?;
        let handle = session.waiter(job).result_handle(HandleType::Host).await?;
        tracing::info!(host = %handle.raw()?, "Connected to VIX host");
        Ok(Self {
            session,
            handle: Arc::new(handle),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn handle(&self) -> &HandleRef {
        &self.handle
    }

    /// Open the VM whose configuration file is `vmx_path`.
    pub async fn open_vm(&self, vmx_path: &str) -> Result<VirtualMachine> {
        if vmx_path.is_empty() {
            return Err(VmError::InvalidArgument("vmx path is empty".into()));
        }
        let op = Operation::OpenVm {
            vmx_path: vmx_path.to_string(),
        };
        let job = self.session.issue(&self.handle, &op)?;
        let handle = self.session.waiter(job).result_handle(HandleType::Vm).await?;
        tracing::info!(vm = %handle.raw()?, vmx_path, "Opened VM");
        Ok(VirtualMachine::with_host(
            self.session.clone(),
            handle,
            Arc::clone(&self.handle),
        ))
    }
}
