use storage_contracts::StorageEngine;
use storage_resolver::{NoProbe, ResolveOptions, Resolver};
use storage_sys::SimulatedTree;
use storage_types::{KickstartScript, StorageAction, StorageConfig, GIB};

use crate::errors::{Result, TestingError};
use crate::spec;

pub type LabResolver = Resolver<SimulatedTree, NoProbe>;

/// Working tree seeded from a lab spec, already reset.
pub fn tree(spec_name: &str) -> Result<SimulatedTree> {
    let spec = spec::load_by_name(spec_name)?;
    let mut tree = SimulatedTree::from_inventory(spec.inventory());
    tree.reset()?;
    Ok(tree)
}

/// Resolver over a lab spec with 4 GiB of memory for swap sizing.
pub fn resolver(spec_name: &str) -> Result<LabResolver> {
    let spec = spec::load_by_name(spec_name)?;
    let options = ResolveOptions {
        total_memory: 4 * GIB,
        ..ResolveOptions::default()
    };
    Ok(Resolver::new(
        SimulatedTree::from_inventory(spec.inventory()),
        NoProbe,
        options,
    ))
}

pub fn config(text: &str) -> Result<StorageConfig> {
    toml::from_str(text).map_err(|error| TestingError::FixtureInvalid {
        reason: error.to_string(),
    })
}

pub fn script(text: &str) -> Result<KickstartScript> {
    toml::from_str(text).map_err(|error| TestingError::FixtureInvalid {
        reason: error.to_string(),
    })
}

/// `"<action kind> <target>"` per action, e.g. `"create device root"`.
pub fn summary(actions: &[StorageAction]) -> Vec<String> {
    actions
        .iter()
        .map(|action| format!("{} {}", action.kind, action.target))
        .collect()
}
