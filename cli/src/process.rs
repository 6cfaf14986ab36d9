// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Child process handling shared by `election run` and `governor run`.

use std::process::{ExitStatus, Stdio};

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};
use tokio::signal;
use tracing::{info, warn};

/// Signals sent to supervised commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    /// Leadership (re)gained while the command was already running.
    Leader,
    /// Leadership lost, command keeps running.
    Follower,
    Interrupt,
    Terminate,
}

/// Split a trailing command line into executable and arguments.
///
/// A single argument containing whitespace is treated as a quoted command
/// line, so both `-- backup.sh --full` and `"backup.sh --full"` work.
pub fn parse_command(parts: &[String]) -> Result<(String, Vec<String>)> {
    let words: Vec<String> = match parts {
        [single] if single.contains(char::is_whitespace) => {
            single.split_whitespace().map(str::to_string).collect()
        }
        _ => parts.to_vec(),
    };

    match words.split_first() {
        Some((executable, args)) if !executable.is_empty() => {
            Ok((executable.clone(), args.to_vec()))
        }
        _ => bail!("could not parse command"),
    }
}

/// Start `executable` with the terminal's stdio.
pub fn spawn(executable: &str, args: &[String]) -> Result<Child> {
    info!("Running command {:?} with {:?}", executable, args);

    Command::new(executable)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("Failed to execute {executable}"))
}

/// Deliver `notify` to a running child.
#[cfg(unix)]
pub fn notify(child: &mut Child, notify: Notify) {
    let Some(pid) = child.id() else {
        return;
    };

    let sig = match notify {
        Notify::Leader => libc::SIGUSR1,
        Notify::Follower => libc::SIGUSR2,
        Notify::Interrupt => libc::SIGINT,
        Notify::Terminate => libc::SIGTERM,
    };

    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };

    // SAFETY: kill(2) has no memory safety requirements
    let rc = unsafe { libc::kill(pid, sig) };
    if rc != 0 {
        warn!("Could not send {:?} to {}: {}", notify, pid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
pub fn notify(child: &mut Child, notify: Notify) {
    if matches!(notify, Notify::Interrupt | Notify::Terminate) {
        if let Err(e) = child.start_kill() {
            warn!("Could not stop child process: {}", e);
        }
    }
}

/// Exit code to propagate for a finished child.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) if code >= 0 => code,
        _ => 1,
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_command_forms() {
        let (exe, args) = parse_command(&strings(&["backup.sh", "--full"])).unwrap();
        assert_eq!(exe, "backup.sh");
        assert_eq!(args, vec!["--full"]);

        let (exe, args) = parse_command(&strings(&["backup.sh --full  /data"])).unwrap();
        assert_eq!(exe, "backup.sh");
        assert_eq!(args, vec!["--full", "/data"]);

        assert!(parse_command(&[]).is_err());
        assert!(parse_command(&strings(&[""])).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_propagates() {
        let mut child = spawn("sh", &strings(&["-c", "exit 3"])).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(exit_code(status), 3);
    }
}
