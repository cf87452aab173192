//! Child-process helpers for the external tools the server drives.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Stop a running child.
///
/// On Unix the child first receives `SIGTERM` and gets `grace` to exit on its
/// own; whatever is still alive afterwards (and every child on other
/// platforms) is killed. Always reaps the child.
#[cfg(feature = "tokio")]
pub async fn terminate_gracefully(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> std::io::Result<std::process::ExitStatus> {
    if let Some(status) = request_exit(child, grace).await {
        return status;
    }

    // Fails only when the child already exited, which `wait` then reports.
    let _ = child.start_kill();
    child.wait().await
}

/// Send `SIGTERM` and wait up to `grace`. `None` if the child is still running.
#[cfg(all(feature = "tokio", unix))]
async fn request_exit(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> Option<std::io::Result<std::process::ExitStatus>> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()?).ok()?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).ok()?;
    tokio::time::timeout(grace, child.wait()).await.ok()
}

#[cfg(all(feature = "tokio", not(unix)))]
async fn request_exit(
    _child: &mut tokio::process::Child,
    _grace: std::time::Duration,
) -> Option<std::io::Result<std::process::ExitStatus>> {
    None
}
