//! Starting applications for `launch` actions

use std::io::ErrorKind;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};

use crate::errors::ActionError;

/// Build the command that starts `path`. On macOS an `.app` bundle is handed
/// to `open -a`; everything else is executed directly.
pub fn launch_command(path: &str, args: &[String]) -> Command {
    if cfg!(target_os = "macos") && path.trim_end_matches('/').ends_with(".app") {
        let mut command = Command::new("open");
        command.arg("-a").arg(path);
        if !args.is_empty() {
            command.arg("--args").args(args);
        }
        command
    } else {
        let mut command = Command::new(path);
        command.args(args);
        command
    }
}

/// Spawn the application and return as soon as the spawn call succeeds.
/// The child is detached; a reaper thread collects its exit status.
pub fn launch(path: &str, args: &[String]) -> Result<u32, ActionError> {
    info!("Launching application: {} {:?}", path, args);
    if path.trim().is_empty() {
        return Err(ActionError::Launch {
            path: path.to_string(),
            reason: "empty application path".to_string(),
        });
    }

    let child = launch_command(path, args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                ActionError::PermissionDenied(format!("cannot execute '{path}': {e}"))
            }
            ErrorKind::NotFound => ActionError::Launch {
                path: path.to_string(),
                reason: if Path::new(path).components().count() > 1 {
                    "no such file".to_string()
                } else {
                    "not found on PATH".to_string()
                },
            },
            _ => ActionError::Launch {
                path: path.to_string(),
                reason: e.to_string(),
            },
        })?;

    let pid = child.id();
    reap(child, path.to_string());
    Ok(pid)
}

fn reap(mut child: Child, path: String) {
    let spawned = thread::Builder::new()
        .name("actuator-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => debug!("Launched '{}' exited with {}", path, status),
            Err(e) => warn!("Failed to wait for launched '{}': {}", path, e),
        });
    if let Err(e) = spawned {
        warn!("Could not start reaper thread: {}", e);
    }
}
