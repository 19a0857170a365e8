//! Command-line arguments.
//!
//! Connection settings fall back to environment variables so scripts can
//! export them once:
//!
//! | Variable | Flag |
//! |----------|------|
//! | `VIX_HOST` | `--host` |
//! | `VIX_PORT` | `--port` |
//! | `VIX_USER` | `--user` |
//! | `VIX_PASSWORD` | `--password` |
//! | `VIX_VMX` | `--vmx` |
//! | `VIX_GUEST_USER` | `--guest-user` |
//! | `VIX_GUEST_PASSWORD` | `--guest-password` |

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;
use vix_core::ServiceProvider;
use vix_vm::{ConnectOptions, VariableType};

#[derive(Debug, Parser)]
#[command(name = "vixctl", version, about = "Run and inspect guest programs through the VIX API")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Path of the VM configuration file on the host
    #[arg(long, env = "VIX_VMX", global = true)]
    pub vmx: Option<String>,

    #[command(flatten)]
    pub guest: GuestArgs,

    /// Use the built-in simulated host instead of VMware
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Remote host; connects to the local host when unset
    #[arg(long, env = "VIX_HOST", global = true)]
    pub host: Option<String>,

    #[arg(long, env = "VIX_PORT", default_value_t = 0, global = true)]
    pub port: u16,

    #[arg(long, env = "VIX_USER", global = true)]
    pub user: Option<String>,

    #[arg(long, env = "VIX_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    #[arg(long, value_enum, default_value_t = Provider::Workstation, global = true)]
    pub provider: Provider,
}

impl ConnectionArgs {
    pub fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::default().provider(self.provider.into());
        if let Some(host) = &self.host {
            options = options.host(host.clone(), self.port);
        }
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            options = options.credentials(user.clone(), password.clone());
        }
        options
    }
}

#[derive(Debug, Args)]
pub struct GuestArgs {
    #[arg(long, env = "VIX_GUEST_USER", global = true)]
    pub guest_user: Option<String>,

    #[arg(long, env = "VIX_GUEST_PASSWORD", hide_env_values = true, global = true)]
    pub guest_password: Option<String>,

    /// Require an interactive guest session (needed for GUI programs)
    #[arg(long, global = true)]
    pub interactive: bool,

    /// Seconds to wait for VMware Tools before guest operations
    #[arg(long, default_value_t = 300, global = true)]
    pub tools_timeout: u64,
}

impl GuestArgs {
    pub fn tools_timeout(&self) -> Duration {
        Duration::from_secs(self.tools_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Workstation,
    Player,
    Server,
    Vsphere,
}

impl From<Provider> for ServiceProvider {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Workstation => ServiceProvider::Workstation,
            Provider::Player => ServiceProvider::Player,
            Provider::Server => ServiceProvider::Server,
            Provider::Vsphere => ServiceProvider::VmwareViServer,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a program in the guest
    Run {
        /// Absolute path of the program in the guest
        program: String,
        /// Arguments, passed to the guest as one command line
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Return once the guest reports a pid
        #[arg(long)]
        detach: bool,
    },
    /// Run script text with a guest interpreter
    Script {
        /// Script text
        script: String,
        /// Interpreter path; the guest default when unset
        #[arg(long)]
        interpreter: Option<String>,
        #[arg(long)]
        detach: bool,
    },
    /// List guest processes
    Ps,
    /// List a guest directory
    Ls { path: String },
    /// Kill a guest process
    Kill { pid: u64 },
    /// Change or report the VM power state
    Power {
        #[arg(value_enum)]
        action: PowerAction,
        /// Ask the guest OS to shut down or restart
        #[arg(long)]
        from_guest: bool,
        /// Open the VM in the product UI when powering on
        #[arg(long)]
        gui: bool,
    },
    /// Read a VM variable, or write it when a value is given
    Var {
        name: String,
        value: Option<String>,
        #[arg(long, value_enum, default_value_t = VarKind::Guest)]
        kind: VarKind,
    },
    /// List the VM's shared folders
    Shares,
}

impl Command {
    /// Whether the command runs inside the guest and so needs a login.
    pub fn needs_guest(&self) -> bool {
        !matches!(
            self,
            Command::Power { .. } | Command::Var { .. } | Command::Shares
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VarKind {
    Guest,
    /// Runtime `.vmx` setting
    Config,
    /// Guest environment variable
    Env,
}

impl From<VarKind> for VariableType {
    fn from(kind: VarKind) -> Self {
        match kind {
            VarKind::Guest => VariableType::Guest,
            VarKind::Config => VariableType::ConfigRuntime,
            VarKind::Env => VariableType::GuestEnvironment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PowerAction {
    On,
    Off,
    Reset,
    Suspend,
    Pause,
    Unpause,
    Status,
}

/// Join program arguments into the single command line VIX expects.
pub fn command_line(args: &[String]) -> Option<String> {
    if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vixctl").chain(args.iter().copied()))
            .expect("Failed to parse")
    }

    #[test]
    fn test_run_keeps_hyphenated_args() {
        let cli = parse(&["--vmx", "/vms/a.vmx", "run", "/bin/ls", "-la", "/tmp"]);
        match cli.command {
            Command::Run {
                program,
                args,
                detach,
            } => {
                assert_eq!(program, "/bin/ls");
                assert_eq!(command_line(&args).as_deref(), Some("-la /tmp"));
                assert!(!detach);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.vmx.as_deref(), Some("/vms/a.vmx"));
    }

    #[test]
    fn test_power_action() {
        let cli = parse(&["power", "off", "--from-guest"]);
        assert!(matches!(
            cli.command,
            Command::Power {
                action: PowerAction::Off,
                from_guest: true,
                gui: false
            }
        ));
        assert!(!cli.command.needs_guest());
        assert!(Cli::try_parse_from(["vixctl", "power", "sideways"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["ps", "--simulate", "--pretty"]);
        assert!(cli.simulate);
        assert!(cli.pretty);
        assert!(cli.command.needs_guest());
    }

    #[test]
    fn test_connect_options() {
        let cli = parse(&[
            "--host", "esx01", "--port", "443", "--user", "root", "--password", "pw",
            "--provider", "vsphere", "ps",
        ]);
        let options = cli.connection.options();
        assert_eq!(options.provider, ServiceProvider::VmwareViServer);
        assert_eq!(options.host.as_deref(), Some("esx01"));
        assert_eq!(options.port, 443);
        assert_eq!(options.user.as_deref(), Some("root"));
    }

    #[test]
    fn test_var_read_and_write() {
        let cli = parse(&["var", "build"]);
        assert!(matches!(
            &cli.command,
            Command::Var { value: None, kind: VarKind::Guest, .. }
        ));
        assert!(!cli.command.needs_guest());

        let cli = parse(&["var", "--kind", "config", "uuid.action", "keep"]);
        match cli.command {
            Command::Var { name, value, kind } => {
                assert_eq!(name, "uuid.action");
                assert_eq!(value.as_deref(), Some("keep"));
                assert_eq!(VariableType::from(kind), VariableType::ConfigRuntime);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_empty_command_line() {
        assert_eq!(command_line(&[]), None);
    }
}
