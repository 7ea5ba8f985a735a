//! Process execution seam
//!
//! Adapters call tools through [`CommandRunner`] so tests can script tool
//! output instead of touching the host.

use crate::error::{Error, Result};
use std::process::Command;

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and extra environment, capturing output.
    ///
    /// A non-zero exit is not an error here; only failure to spawn is.
    fn run(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<CommandOutput>;

    /// Run and turn a non-zero exit into a classified [`Error`]
    fn run_checked(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<String> {
        let output = self.run(program, args, env)?;
        if !output.success() {
            let stderr = if output.stderr.trim().is_empty() {
                &output.stdout
            } else {
                &output.stderr
            };
            return Err(Error::from_output(program, stderr));
        }
        Ok(output.stdout)
    }
}

/// Runs real processes with `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<CommandOutput> {
        log::debug!("Running: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .envs(env.iter().copied())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::CommandMissing {
                    tool: program.to_string(),
                },
                _ => Error::Io(e),
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        log::trace!("{} exited with {:?}", program, result.code);
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Runner that replays scripted outputs and records invocations
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(self, stdout: &str) -> Self {
            self.push(0, stdout, "")
        }

        pub fn fail(self, code: i32, stderr: &str) -> Self {
            self.push(code, "", stderr)
        }

        fn push(self, code: i32, stdout: &str, stderr: &str) -> Self {
            self.responses.lock().unwrap().push_back(CommandOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str], _env: &[(&str, &str)]) -> Result<CommandOutput> {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            self.calls.lock().unwrap().push(line);
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutput {
                    code: Some(0),
                    ..Default::default()
                }))
        }
    }
}
