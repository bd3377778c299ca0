//! Helpers for spawning worker child processes.

use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
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

/// Path of the running executable, used to re-exec it in worker mode.
pub fn current_program() -> io::Result<PathBuf> {
    std::env::current_exe()
}

/// Command that re-executes the current binary with `args`.
///
/// The child's stdin is piped (it carries control messages); stdout and
/// stderr are inherited so worker logs land on the supervisor's terminal.
#[cfg(feature = "tokio")]
pub fn self_command<I, S>(args: I) -> io::Result<tokio::process::Command>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    use std::process::Stdio;

    let mut cmd = tokio_command(current_program()?);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(false);
    Ok(cmd)
}
