//! Process spawning helpers shared across the workspace.
//!
//! Encoder profiles are configured as full command lines, so most callers go
//! through [`tokio_shell`], which hands the line to the platform shell with
//! the console window suppressed on Windows.

#[cfg(feature = "tokio")]
use std::ffi::OsStr;

#[cfg(all(windows, feature = "tokio"))]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

/// Program and leading arguments used to run a command line through the shell.
pub fn shell_invocation() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
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

/// Create a window-less `tokio::process::Command` for `program`.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a `tokio::process::Command` that runs `line` through the platform shell.
///
/// The child is killed when the returned command's `Child` is dropped, so an
/// abandoned encode never outlives its owner.
#[cfg(feature = "tokio")]
pub fn tokio_shell(line: &str) -> tokio::process::Command {
    let (shell, flag) = shell_invocation();
    let mut cmd = tokio_command(shell);
    cmd.args([flag, line]).kill_on_drop(true);
    cmd
}
