use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use storage_contracts::StorageEngine;
use storage_testing::{lab, spec};
use storage_types::bytes_to_pretty;

#[derive(Debug, Parser)]
#[command(name = "lab")]
#[command(about = "Inspect lab device trees and plan layouts against them")]
struct LabCli {
    #[command(subcommand)]
    command: LabCommand,
}

#[derive(Debug, Subcommand)]
enum LabCommand {
    /// List the available lab specs
    List,
    /// Print the device tree of a lab spec
    Show { spec_name: String },
    /// Plan a configuration (or command list) against a lab spec
    Plan {
        spec_name: String,
        source: PathBuf,
        #[arg(long)]
        kickstart: bool,
    },
}

fn main() -> Result<()> {
    let cli = LabCli::parse();
    match cli.command {
        LabCommand::List => {
            for name in spec::spec_names()? {
                let spec = spec::load_by_name(&name)?;
                println!("{name}: {}", spec.description.unwrap_or_default());
            }
        }
        LabCommand::Show { spec_name } => {
            let tree = lab::tree(&spec_name)?;
            for device in tree.devices() {
                let depth = ancestry(&tree, device.id);
                print!(
                    "{:indent$}{} ({}, {})",
                    "",
                    device.name,
                    device.kind,
                    bytes_to_pretty(device.size, false),
                    indent = depth * 2
                );
                if let Some(kind) = device.format_kind() {
                    print!(" {kind}");
                }
                if let Some(mountpoint) = device.mountpoint() {
                    print!(" at {mountpoint}");
                }
                println!();
            }
        }
        LabCommand::Plan {
            spec_name,
            source,
            kickstart,
        } => {
            let text = fs::read_to_string(&source)
                .with_context(|| format!("reading {}", source.display()))?;
            let mut resolver = lab::resolver(&spec_name)?;
            let plan = if kickstart {
                resolver.plan_commands(&lab::script(&text)?)?
            } else {
                resolver.plan(&lab::config(&text)?)?
            };
            print!("{plan}");
        }
    }
    Ok(())
}

fn ancestry(tree: &impl StorageEngine, id: storage_types::DeviceId) -> usize {
    let mut depth = 0;
    let mut current = id;
    while let Some(&parent) = tree.device(current).and_then(|node| node.parents.first()) {
        depth += 1;
        current = parent;
    }
    depth
}
