// SPDX-License-Identifier: GPL-3.0-only

//! storage-plan - resolve declarative storage layouts into storage actions
//!
//! Reads a storage configuration (or an imperative command list), builds the
//! ordered action list against the running system or a device inventory and
//! either prints it (`--dry-run`) or commits it with the system tools.

use anyhow::{Context, Result, bail};
use clap::Parser;
use storage_contracts::{DeviceProbe, StorageEngine, StorageError};
use storage_resolver::{NoProbe, Resolver};
use storage_sys::{CommandCommitter, Inventory, ScriptProbe, SimulatedTree, TreeSource};
use tracing::{info, warn};

mod cli;
mod config;
mod input;
mod logging;

use cli::Cli;
use config::{AppConfig, LoggingLevel};
use input::{Encoding, Input};

/// Match-script probe, when the site configures a helper program.
enum Probe {
    Script(ScriptProbe),
    Unconfigured(NoProbe),
}

impl DeviceProbe for Probe {
    fn probe(&self, script: &str, name: &str) -> Result<String, StorageError> {
        match self {
            Self::Script(probe) => probe.probe(script, name),
            Self::Unconfigured(probe) => probe.probe(script, name),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load(cli.config.as_deref())?;
    logging::init(
        LoggingLevel::from_verbosity(cli.verbose),
        app_config.log_dir.as_deref(),
    );
    info!("storage-plan v{}", env!("CARGO_PKG_VERSION"));

    let mut options = app_config.resolve_options()?;
    match storage_sys::total_memory() {
        Ok(memory) => options.total_memory = memory,
        Err(e) => warn!("using default memory size for swap suggestions: {e}"),
    }

    let encoding = if cli.json { Encoding::Json } else { Encoding::Toml };
    let input = input::read(
        &cli.source,
        encoding,
        cli.kickstart,
        app_config.syntax_version,
    )?;

    // Inventories are never committed to real devices.
    let simulate = cli.dry_run || cli.inventory.is_some();
    if !simulate && unsafe { libc::geteuid() } != 0 {
        bail!("storage-plan must run as root to change or mount devices; use --dry-run to plan only");
    }

    let source = match &cli.inventory {
        Some(path) => TreeSource::Inventory(
            Inventory::load(path)
                .with_context(|| format!("loading inventory {}", path.display()))?,
        ),
        None => TreeSource::System,
    };
    let committer = if simulate {
        CommandCommitter::dry_run()
    } else {
        CommandCommitter::new()
    };
    let engine = SimulatedTree::new(source).with_committer(committer);
    let probe = match &app_config.probe_script {
        Some(program) => Probe::Script(ScriptProbe::new(program)),
        None => Probe::Unconfigured(NoProbe),
    };
    let mut resolver = Resolver::new(engine, probe, options);

    if let Some(root) = &cli.mount {
        let Input::Config(config) = &input else {
            bail!("mount-only mode needs a storage configuration, not a command list");
        };
        let mounted = resolver
            .mount_only(config, root)
            .with_context(|| format!("mounting below {}", root.display()))?;
        for (device, target) in mounted {
            let name = resolver
                .engine()
                .device(device)
                .map(|node| node.path())
                .unwrap_or_default();
            println!("{name} -> {}", target.display());
        }
        resolver.engine_mut().shutdown()?;
        return Ok(());
    }

    let plan = match &input {
        Input::Config(config) => resolver.realize(config),
        Input::Script(script) => resolver.realize_commands(script),
    }
    .with_context(|| format!("resolving {}", cli.source.display()))?;

    print!("{plan}");
    if simulate {
        let commands = resolver.engine().committer().commands();
        if !commands.is_empty() {
            println!();
            for command in commands {
                println!("# {command}");
            }
        }
    }
    resolver.engine_mut().shutdown()?;
    Ok(())
}
