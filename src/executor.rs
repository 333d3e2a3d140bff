use std::fmt;
use std::process::{Command, Stdio};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured outcome of a finished child process. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub message: String,
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionError {
    fn launch_failure(argv: &[String], message: String) -> Self {
        Self {
            message,
            argv: argv.to_vec(),
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exit_code = self
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none".to_owned());
        write!(
            f,
            "{}\nCommand: {:?}\nReturn code: {}\nOutput: {}\nError: {}",
            self.message,
            self.argv,
            exit_code,
            String::from_utf8_lossy(&self.stdout),
            String::from_utf8_lossy(&self.stderr)
        )
    }
}

impl std::error::Error for ExecutionError {}

/// Runs a command line to completion, capturing both output streams.
///
/// Invocation is synchronous: the caller blocks until the child exits and
/// stdout/stderr are fully drained. Output is captured, never inherited,
/// so a GUI host process keeps its console untouched.
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn run(argv: &[String]) -> Result<ProcessResult, ExecutionError> {
        let (program, rest) = argv.split_first().ok_or_else(|| {
            ExecutionError::launch_failure(argv, "cannot run an empty command line".to_owned())
        })?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = command.output().map_err(|err| {
            ExecutionError::launch_failure(argv, format!("failed launching {program}: {err}"))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(ExecutionError {
                message: "Error executing command.".to_owned(),
                argv: argv.to_vec(),
                exit_code: Some(exit_code),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(ProcessResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionError, ProcessExecutor};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| (*part).to_owned()).collect()
    }

    #[test]
    fn empty_command_line_is_rejected() {
        let err = ProcessExecutor::run(&[]).expect_err("empty argv");
        assert!(err.message.contains("empty command line"));
        assert_eq!(err.exit_code, None);
    }

    #[test]
    fn missing_program_reports_launch_failure() {
        let err = ProcessExecutor::run(&argv(&["shotgun-bridge-no-such-binary"]))
            .expect_err("missing program");
        assert!(err.message.contains("failed launching"));
        assert_eq!(err.exit_code, None);
    }

    #[cfg(unix)]
    #[test]
    fn successful_child_yields_captured_output() {
        let result =
            ProcessExecutor::run(&argv(&["sh", "-c", "printf pong"])).expect("child succeeds");
        assert_eq!(result.stdout, b"pong");
        assert!(result.stderr.is_empty());
        assert_eq!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_carries_streams_and_code() {
        let err = ProcessExecutor::run(&argv(&["sh", "-c", "echo out; echo boom >&2; exit 3"]))
            .expect_err("child fails");
        assert_eq!(err.exit_code, Some(3));
        assert_eq!(err.stdout, b"out\n");
        assert_eq!(err.stderr, b"boom\n");
        let rendered = err.to_string();
        assert!(rendered.contains("Return code: 3"));
        assert!(rendered.contains("boom"));
    }

    #[test]
    fn display_includes_argv_and_placeholder_exit_code() {
        let err = ExecutionError {
            message: "Error executing command.".to_owned(),
            argv: argv(&["tank", "shotgun_cache"]),
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("\"tank\""));
        assert!(rendered.contains("Return code: none"));
    }
}
