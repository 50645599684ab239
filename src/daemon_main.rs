// This runs daemon on windows without creating a console. Disable during development to see
// stdout.
#![windows_subsystem = "windows"]

use std::{env::args, path::PathBuf};

use anyhow::Result;
use clap::Parser;
use exewatch::{
    daemon::{args::DaemonArgs, start_daemon},
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, DAEMON_PREFIX},
        runtime::single_thread_runtime,
    },
};
use tracing::error;

/// Which side of the detach the current process ended up on.
enum Side {
    Launcher,
    Daemon,
}

fn main() -> Result<()> {
    let mut args = DaemonArgs::parse_from(args());
    // Detaching moves the process into `/`, so relative directories have to be resolved first.
    args.dir = args
        .dir
        .take()
        .map(|dir| -> Result<PathBuf> { Ok(ensure_dir(dir)?.canonicalize()?) })
        .transpose()?;

    if !args.force {
        if let Side::Launcher = detach()? {
            println!("Created daemon");
            return Ok(());
        }
    }

    run(args)
}

/// Starts a copy of this executable with `--force` and no console.
#[cfg(feature = "win")]
fn detach() -> Result<Side> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};
    use windows::Win32::System::Threading::DETACHED_PROCESS;

    let mut command = Command::new(std::env::current_exe()?);
    command
        .args(args().skip(1))
        .arg("--force")
        .creation_flags(DETACHED_PROCESS.0)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[allow(clippy::zombie_processes)]
    command.spawn()?;
    Ok(Side::Launcher)
}

#[cfg(all(unix, not(feature = "win")))]
fn detach() -> Result<Side> {
    use daemonize::{Daemonize, Outcome, Stdio};

    match Daemonize::new()
        .stdout(Stdio::devnull())
        .stderr(Stdio::devnull())
        .execute()
    {
        Outcome::Parent(parent) => {
            parent.inspect_err(|e| error!("Failed to create daemon on parent side {e:?}"))?;
            Ok(Side::Launcher)
        }
        Outcome::Child(child) => {
            child?;
            Ok(Side::Daemon)
        }
    }
}

#[cfg(not(any(unix, feature = "win")))]
fn detach() -> Result<Side> {
    Ok(Side::Daemon)
}

fn run(args: DaemonArgs) -> Result<()> {
    let app_dir = match args.dir {
        Some(dir) => dir,
        None => create_application_default_path()?,
    };
    enable_logging(DAEMON_PREFIX, &app_dir, args.log, args.log_console)?;
    single_thread_runtime()?
        .block_on(start_daemon(app_dir, args.snapshot))
        .inspect_err(|e| error!("Daemon failed {e:?}"))?;
    Ok(())
}
