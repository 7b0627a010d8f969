//! Small process-related helpers for spawning external media tools.

use std::ffi::OsStr;
use std::process::ExitStatus;

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

/// Create a command for a process that consumes raw bytes on stdin.
///
/// stdin and stderr are piped, stdout is discarded and the child is killed
/// if its handle is dropped before it exits.
#[cfg(feature = "tokio")]
pub fn piped_input_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    use std::process::Stdio;

    let mut cmd = tokio_command(program);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Human readable description of a non-successful exit status.
pub fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return format!("terminated by signal {signal}");
                }
            }
            "terminated without an exit code".to_string()
        }
    }
}

/// Keep at most `max_lines` trailing lines of a process' diagnostic output.
pub fn tail_lines(output: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
