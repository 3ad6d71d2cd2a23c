// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "storage-plan", version)]
#[command(about = "Resolve a declarative storage layout into ordered storage actions")]
pub struct Cli {
    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the planned actions and tool invocations without running them
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// The source is JSON instead of TOML
    #[arg(short = 'J', long)]
    pub json: bool,

    /// Only mount the configured filesystems below PATH
    #[arg(
        short,
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = "/mnt"
    )]
    pub mount: Option<PathBuf>,

    /// The source is an imperative command list
    #[arg(short, long)]
    pub kickstart: bool,

    /// Resolve against a device inventory instead of the running system
    #[arg(short, long, value_name = "PATH")]
    pub inventory: Option<PathBuf>,

    /// Application configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Storage configuration to resolve
    #[arg(value_parser = existing_path)]
    pub source: PathBuf,
}

fn existing_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("{value} does not exist"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_defaults_to_mnt() {
        let cli = Cli::try_parse_from(["storage-plan", "-m", "-vv", "/"]).unwrap();
        assert_eq!(cli.mount, Some(PathBuf::from("/mnt")));
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["storage-plan", "--mount=/target", "/"]).unwrap();
        assert_eq!(cli.mount, Some(PathBuf::from("/target")));
    }

    #[test]
    fn source_must_exist() {
        assert!(Cli::try_parse_from(["storage-plan", "/does/not/exist.toml"]).is_err());
        assert!(Cli::try_parse_from(["storage-plan"]).is_err());
    }
}
