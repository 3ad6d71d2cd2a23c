// SPDX-License-Identifier: GPL-3.0-only

//! Match-script probing

use std::path::PathBuf;

use storage_contracts::{DeviceProbe, StorageError};
use tracing::debug;

use crate::SysError;
use crate::cmd::{self, ToolCommand};

/// Runs a helper program with the script and symbolic name as arguments;
/// the first line it prints is the matching device name.
#[derive(Debug, Clone)]
pub struct ScriptProbe {
    program: PathBuf,
}

impl ScriptProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DeviceProbe for ScriptProbe {
    fn probe(&self, script: &str, name: &str) -> Result<String, StorageError> {
        let program = self.program.display().to_string();
        let tool = ToolCommand::new(&program).args([script, name]);
        let outcome = cmd::run(&tool, false)?;

        let device = parse_probe_output(&outcome.stdout).ok_or_else(|| SysError::Parse {
            tool: program,
            reason: format!("no device printed for {name}"),
        })?;
        debug!("probe for {name} selected {device}");
        Ok(device)
    }
}

fn parse_probe_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("/dev/").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_empty_line_wins() {
        assert_eq!(
            parse_probe_output("\n/dev/nvme0n1\nsdb\n"),
            Some("nvme0n1".to_string())
        );
        assert_eq!(parse_probe_output("  \n"), None);
    }
}
