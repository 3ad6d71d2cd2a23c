// SPDX-License-Identifier: GPL-3.0-only

//! External tool invocation

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::{Result, SysError};

/// A tool invocation, optionally fed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Secret input (passphrases); never rendered.
    pub stdin: Option<String>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn render(&self) -> String {
        render(&self.program, &self.args)
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub executed: bool,
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Run `tool`, or only render it when `dry_run` is set.
pub fn run(tool: &ToolCommand, dry_run: bool) -> Result<CommandOutcome> {
    let rendered = tool.render();
    if dry_run {
        return Ok(CommandOutcome {
            command: rendered,
            stdout: String::new(),
            stderr: String::new(),
            executed: false,
        });
    }

    if which::which(&tool.program).is_err() {
        return Err(SysError::ToolMissing(tool.program.clone()));
    }

    debug!("running {rendered}");
    let mut child = Command::new(&tool.program)
        .args(&tool.args)
        .stdin(if tool.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| SysError::CommandFailed {
            command: rendered.clone(),
            stderr: error.to_string(),
        })?;

    if let (Some(input), Some(mut pipe)) = (&tool.stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(SysError::CommandFailed {
            command: rendered,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        executed: true,
    })
}

/// Run a read-only query tool and return its stdout.
pub fn run_command(command: &str, args: &[&str]) -> Result<String> {
    let tool = ToolCommand::new(command).args(args.iter().copied());
    Ok(run(&tool, false)?.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_command_context() {
        let tool = ToolCommand::new("mkfs.ext4").args(["-F", "-L", "root", "/dev/sda1"]);
        assert_eq!(tool.render(), "mkfs.ext4 -F -L root /dev/sda1");
    }

    #[test]
    fn stdin_is_not_rendered() {
        let tool = ToolCommand::new("cryptsetup")
            .args(["luksFormat", "--batch-mode", "--key-file=-", "/dev/sda2"])
            .stdin("hunter2");
        let outcome = run(&tool, true).unwrap();
        assert!(!outcome.executed);
        assert!(!outcome.command.contains("hunter2"));
    }
}
