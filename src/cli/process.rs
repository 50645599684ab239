use std::{env, path::Path, process::Stdio};

use anyhow::Result;
use sysinfo::{get_current_pid, ProcessRefreshKind, RefreshKind, Signal, System, UpdateKind};
use tracing::info;

use super::daemon_path::to_daemon_path;

/// Terminates every process started from the executable at `name`, except this one and its
/// children. Terminated daemons close their sessions before exiting.
pub fn kill_previous_servers(name: &Path) {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_exe(UpdateKind::Always)),
    );
    let current_id = get_current_pid().ok();
    for (pid, process) in system.processes().iter() {
        if Some(*pid) == current_id {
            continue;
        }
        if process.parent().is_some() && process.parent() == current_id {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            info!("Stopping daemon {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
        }
    }
}

/// Shuts down the previous daemon and starts a new one for `dir`. The daemon binary detaches by
/// itself.
pub fn restart_server(dir: &Path) -> Result<()> {
    let daemon = to_daemon_path(env::current_exe()?);
    kill_previous_servers(&daemon);
    let mut command = std::process::Command::new(&daemon);
    command.arg("--dir").arg(dir);

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    println!("Spawning {daemon:?}");
    let status = command.status()?;
    if !status.success() {
        anyhow::bail!("Daemon exited with {status}");
    }
    println!("Success");
    Ok(())
}
