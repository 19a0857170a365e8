//! Subcommand execution.

use crate::cli::{command_line, Cli, Command, GuestArgs, PowerAction};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use vix_core::{Process, Session};
use vix_vm::{Host, VirtualMachine};

/// Connect, open the VM and run the subcommand. Returns the JSON to print.
pub async fn execute(cli: &Cli, session: Session, vmx_path: &str) -> Result<Value> {
    let host = Host::connect(session, cli.connection.options())
        .await
        .context("Failed to connect to host")?;
    let vm = host
        .open_vm(vmx_path)
        .await
        .with_context(|| format!("Failed to open {vmx_path}"))?;

    if !cli.command.needs_guest() {
        return run(&cli.command, &vm).await;
    }

    login(&vm, &cli.guest).await?;
    let output = run(&cli.command, &vm).await;
    if let Err(e) = vm.logout().await {
        tracing::warn!(error = %e, "Failed to log out of guest");
    }
    output
}

async fn login(vm: &VirtualMachine, guest: &GuestArgs) -> Result<()> {
    vm.wait_for_tools(Some(guest.tools_timeout()))
        .await
        .context("VMware Tools is not running in the guest")?;
    let user = guest.guest_user.as_deref().unwrap_or_default();
    let password = guest.guest_password.as_deref().unwrap_or_default();
    vm.login(user, password, guest.interactive)
        .await
        .context("Failed to log in to guest")?;
    Ok(())
}

async fn run(command: &Command, vm: &VirtualMachine) -> Result<Value> {
    match command {
        Command::Run {
            program,
            args,
            detach,
        } => {
            let args = command_line(args);
            let process = vm.proc_run(program, args.as_deref(), !detach).await?;
            Ok(process_json(&process))
        }
        Command::Script {
            script,
            interpreter,
            detach,
        } => {
            let process = vm
                .run_script(interpreter.as_deref(), script, !detach)
                .await?;
            Ok(process_json(&process))
        }
        Command::Ps => Ok(serde_json::to_value(vm.proc_list().await?)?),
        Command::Ls { path } => Ok(serde_json::to_value(vm.dir_list(path).await?)?),
        Command::Kill { pid } => {
            vm.proc_kill(*pid).await?;
            Ok(json!({ "killed": pid }))
        }
        Command::Power {
            action,
            from_guest,
            gui,
        } => {
            match action {
                PowerAction::On => vm.power_on(*gui).await?,
                PowerAction::Off => vm.power_off(*from_guest).await?,
                PowerAction::Reset => vm.reset(*from_guest).await?,
                PowerAction::Suspend => vm.suspend().await?,
                PowerAction::Pause => vm.pause().await?,
                PowerAction::Unpause => vm.unpause().await?,
                PowerAction::Status => {}
            }
            status_json(vm)
        }
        Command::Var { name, value, kind } => {
            let var_type = (*kind).into();
            if let Some(value) = value {
                vm.write_variable(var_type, name, value).await?;
            }
            let value = vm.read_variable(var_type, name).await?;
            Ok(json!({ "name": name, "value": value }))
        }
        Command::Shares => Ok(serde_json::to_value(vm.shared_folders().await?)?),
    }
}

fn process_json(process: &Process) -> Value {
    json!({
        "pid": process.pid,
        "exit_code": process.exit_code,
        "elapsed_secs": process.elapsed_time.map(|d| d.as_secs_f64()),
    })
}

fn status_json(vm: &VirtualMachine) -> Result<Value> {
    let power = vm.power_state()?;
    Ok(json!({
        "name": vm.name()?,
        "vmx_path": vm.vmx_path()?,
        "power_state": power.to_string(),
        "power_state_raw": power,
        "tools_state": vm.tools_state()?.to_string(),
        "running": vm.is_running()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use clap::Parser;
    use vix_core::BridgeConfig;

    async fn exec(args: &[&str]) -> Result<Value> {
        let cli = Cli::try_parse_from(std::iter::once("vixctl").chain(args.iter().copied()))?;
        let session = Session::new(demo::runtime(demo::DEFAULT_VMX), BridgeConfig::default());
        execute(&cli, session, demo::DEFAULT_VMX).await
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let output = exec(&["run", "/bin/false"]).await.unwrap();
        assert_eq!(output["exit_code"], 1);
        assert_eq!(output["elapsed_secs"], 0.0);

        let detached = exec(&["run", "--detach", "/bin/true"]).await.unwrap();
        assert!(detached["pid"].as_u64().is_some());
        assert!(detached["exit_code"].is_null());
    }

    #[tokio::test]
    async fn test_script_with_default_interpreter() {
        let output = exec(&["script", "echo hi"]).await.unwrap();
        assert_eq!(output["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_ps_and_kill() {
        let output = exec(&["ps"]).await.unwrap();
        let names: Vec<&str> = output
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["systemd", "sshd", "bash"]);

        let killed = exec(&["kill", "812"]).await.unwrap();
        assert_eq!(killed["killed"], 812);
        assert!(exec(&["kill", "9999"]).await.is_err());
    }

    #[tokio::test]
    async fn test_ls() {
        let output = exec(&["ls", "/home/user"]).await.unwrap();
        assert_eq!(output[1]["name"], "projects");
        assert_eq!(output[1]["is_dir"], true);
        assert!(exec(&["ls", "/missing"]).await.is_err());
    }

    #[tokio::test]
    async fn test_var_write_then_read() {
        let output = exec(&["var", "build", "42"]).await.unwrap();
        assert_eq!(output, json!({ "name": "build", "value": "42" }));

        let unset = exec(&["var", "--kind", "env", "HOME"]).await.unwrap();
        assert_eq!(unset["value"], "");
    }

    #[tokio::test]
    async fn test_shares() {
        let output = exec(&["shares"]).await.unwrap();
        assert_eq!(output[0]["name"], "host-home");
        assert_eq!(output[0]["write_access"], false);
    }

    #[tokio::test]
    async fn test_power_status_and_off() {
        let status = exec(&["power", "status"]).await.unwrap();
        assert_eq!(status["name"], "demo");
        assert_eq!(status["running"], true);

        let off = exec(&["power", "off"]).await.unwrap();
        assert_eq!(off["running"], false);
        assert_eq!(off["power_state"], "powered-off");
    }
}
