// SPDX-License-Identifier: GPL-3.0-only

//! Entry points tying the builders to an engine

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use storage_contracts::{DeviceProbe, StorageEngine};
use storage_types::{CommandDecodeError, DeviceId, KickstartScript, StorageAction, StorageConfig};
use tracing::{debug, info, warn};

use crate::commands;
use crate::context::{DeferredMount, ResolveContext, ResolveOptions};
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph;

/// Ordered actions of one pass plus the mount metadata of reused devices.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub actions: Vec<StorageAction>,
    pub deferred_mounts: Vec<DeferredMount>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.deferred_mounts.is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            writeln!(f, "no actions")?;
        }
        for (index, action) in self.actions.iter().enumerate() {
            writeln!(f, "{:>3}. {action}", index + 1)?;
        }
        for mount in &self.deferred_mounts {
            write!(f, "     keep {}", mount.name)?;
            if let Some(mountpoint) = &mount.mountpoint {
                write!(f, " mounted at {mountpoint}")?;
            }
            if let Some(options) = &mount.options {
                write!(f, " ({options})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct Resolver<E, P> {
    engine: E,
    probe: P,
    context: ResolveContext,
}

impl<E: StorageEngine, P: DeviceProbe> Resolver<E, P> {
    pub fn new(engine: E, probe: P, options: ResolveOptions) -> Self {
        Self {
            engine,
            probe,
            context: ResolveContext::new(options),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Build the action list for `config` without touching any device.
    pub fn plan(&mut self, config: &StorageConfig) -> Result<Plan> {
        self.begin()?;
        let built = graph::build(&mut self.engine, &self.probe, &mut self.context, config);
        self.finish(built)
    }

    /// Plan `config` and commit the result.
    pub fn realize(&mut self, config: &StorageConfig) -> Result<Plan> {
        let plan = self.plan(config)?;
        self.commit(&plan)?;
        Ok(plan)
    }

    /// Build the action list for an imperative command list.
    pub fn plan_commands(&mut self, script: &KickstartScript) -> Result<Plan> {
        let decoded = script.decode().map_err(decode_error)?;
        self.begin()?;
        let ran = commands::run(&mut self.engine, &mut self.context, &decoded);
        self.finish(ran)
    }

    pub fn realize_commands(&mut self, script: &KickstartScript) -> Result<Plan> {
        let plan = self.plan_commands(script)?;
        self.commit(&plan)?;
        Ok(plan)
    }

    /// Mount every filesystem of `config` below `root`, looking devices up by
    /// UUID only. Nothing is created, destroyed or formatted.
    pub fn mount_only(
        &mut self,
        config: &StorageConfig,
        root: &Path,
    ) -> Result<Vec<(DeviceId, PathBuf)>> {
        self.begin()?;
        let mut targets = Vec::new();
        for (mountpoint, entry) in &config.file_systems {
            let location = SpecLocation::FileSystem(mountpoint.clone());
            let uuid = entry
                .uuid
                .as_deref()
                .or_else(|| config.storage.uuid_of(&entry.storage))
                .ok_or_else(|| ResolveError::spec(location.clone(), Violation::MissingUuid))?;
            let device = self
                .engine
                .by_uuid(uuid)
                .ok_or_else(|| ResolveError::unresolved(location, format!("UUID={uuid}")))?;
            targets.push((device, mountpoint.as_str()));
        }
        targets.sort_by_key(|(_, mountpoint)| {
            let depth = Path::new(mountpoint).components().count();
            (depth, *mountpoint)
        });

        let mut mounted = Vec::with_capacity(targets.len());
        for (device, mountpoint) in targets {
            let target = root.join(mountpoint.trim_start_matches('/'));
            debug!("mounting {mountpoint} at {}", target.display());
            self.engine
                .mount(device, &target)
                .map_err(|source| ResolveError::Io {
                    context: format!("mounting {mountpoint} at {}", target.display()),
                    source,
                })?;
            mounted.push((device, target));
        }
        info!("mounted {} filesystem(s) below {}", mounted.len(), root.display());
        Ok(mounted)
    }

    fn begin(&mut self) -> Result<()> {
        self.context.begin_pass();
        self.engine.reset().map_err(|source| ResolveError::Io {
            context: "resetting the working tree".to_string(),
            source,
        })
    }

    fn finish(&mut self, outcome: Result<()>) -> Result<Plan> {
        if let Err(error) = outcome {
            warn!("resolution failed: {error}");
            if let Err(reset) = self.engine.reset() {
                warn!("discarding partial changes failed: {reset}");
            }
            return Err(error);
        }
        let plan = Plan {
            actions: self.engine.actions().to_vec(),
            deferred_mounts: self.context.deferred_mounts().to_vec(),
        };
        info!(
            "planned {} action(s), {} kept device(s)",
            plan.actions.len(),
            plan.deferred_mounts.len()
        );
        Ok(plan)
    }

    fn commit(&mut self, plan: &Plan) -> Result<()> {
        info!("committing {} action(s)", plan.actions.len());
        self.engine.do_it().map_err(|source| ResolveError::Io {
            context: "committing the planned actions".to_string(),
            source,
        })
    }
}

fn decode_error(error: CommandDecodeError) -> ResolveError {
    match error {
        CommandDecodeError::Unsupported {
            index,
            command,
            version,
        } => ResolveError::spec(
            SpecLocation::Script(index),
            Violation::InvalidCommand(format!(
                "'{command}' is not supported by syntax version {version}"
            )),
        ),
        CommandDecodeError::InvalidOptions {
            index,
            command,
            source,
        } => ResolveError::spec(
            SpecLocation::command(index, command),
            Violation::InvalidCommand(source.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{ActionKind, DeviceKind, DiskLabelType, FilesystemType, FormatKind, GIB};

    use super::*;
    use crate::matcher::NoProbe;

    fn resolver(devices: Vec<InventoryDevice>) -> Resolver<SimulatedTree, NoProbe> {
        let tree = SimulatedTree::from_inventory(Inventory { devices });
        Resolver::new(tree, NoProbe, ResolveOptions::default())
    }

    fn gpt_disk(name: &str) -> InventoryDevice {
        let mut disk = InventoryDevice::new(name, DeviceKind::Disk, 100 * GIB);
        disk.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
        disk
    }

    fn config(toml: &str) -> StorageConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn one_growing_root_partition() {
        let mut resolver = resolver(vec![gpt_disk("sda")]);
        let plan = resolver
            .plan(&config(
                r#"
                [storage.disk.sda]
                match = { name = "sda" }

                [storage.partition.root]
                targetDevice = "disk.sda"
                size = "fill"

                [storage.btrfs]

                [fileSystems."/"]
                storage = "partition.root"
                fsType = "ext4"
                "#,
            ))
            .unwrap();

        let kinds: Vec<ActionKind> = plan.actions.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ActionKind::Create, ActionKind::CreateFormat]);
        let request = plan.actions[0].request().unwrap();
        assert!(request.grow);
        let format = plan.actions[1].format().unwrap();
        assert_eq!(format.kind.name(), "ext4");
        assert_eq!(format.mountpoint.as_deref(), Some("/"));
    }

    #[test]
    fn second_pass_claims_the_mountpoint() {
        let mut sda1 = InventoryDevice::new("sda1", DeviceKind::Partition, 50 * GIB);
        sda1.parents = vec!["sda".to_string()];
        sda1.partition_number = Some(1);
        let mut resolver = resolver(vec![gpt_disk("sda"), sda1]);

        resolver
            .realize(&config(
                r#"
                [storage.disk.sda]
                match = { name = "sda" }

                [storage.partition.pv]
                targetDevice = "disk.sda"
                onPart = "sda1"

                [storage.btrfs]

                [storage.volgroup.vg]
                devices = ["partition.pv"]

                [storage.logvol.a]
                volgroup = "volgroup.vg"
                size = { gib = 1 }

                [fileSystems."/data"]
                storage = "logvol.a"
                fsType = "xfs"
                "#,
            ))
            .unwrap();
        let first = resolver.engine().by_name("vg-a").unwrap();
        assert_eq!(resolver.engine().mountpoint_owner("/data"), Some(first));

        let plan = resolver
            .plan(&config(
                r#"
                [storage.disk.sda]
                match = { name = "sda" }

                [storage.partition]

                [storage.btrfs]

                [storage.volgroup.vg]
                useExisting = true

                [storage.logvol.b]
                volgroup = "volgroup.vg"
                size = { gib = 1 }

                [fileSystems."/data"]
                storage = "logvol.b"
                fsType = "xfs"
                "#,
            ))
            .unwrap();
        let second = resolver.engine().by_name("vg-b").unwrap();
        assert_eq!(resolver.engine().mountpoint_owner("/data"), Some(second));
        assert_eq!(resolver.engine().by_name("vg-a"), None);
        assert_eq!(plan.actions[0].kind, ActionKind::Destroy);
        assert_eq!(plan.actions[0].device, first);
    }

    #[test]
    fn failed_passes_leave_a_clean_tree() {
        let mut resolver = resolver(vec![gpt_disk("sda")]);
        let error = resolver
            .plan(&config(
                r#"
                [storage.disk.sda]
                match = { name = "sda" }

                [storage.partition.root]
                targetDevice = "disk.sda"
                size = "fill"

                [storage.btrfs]

                [fileSystems."relative/path"]
                storage = "partition.root"
                "#,
            ))
            .unwrap_err();
        assert!(matches!(
            error.violation(),
            Some(Violation::InvalidMountpoint(_))
        ));
        assert!(resolver.engine().actions().is_empty());
    }

    #[test]
    fn mount_only_goes_by_uuid_and_depth() {
        let mut root = InventoryDevice::new("sda1", DeviceKind::Partition, 50 * GIB);
        root.parents = vec!["sda".to_string()];
        root.partition_number = Some(1);
        root.format = Some(FormatKind::Filesystem(FilesystemType::Ext4));
        root.uuid = Some("1111".to_string());
        let mut home = InventoryDevice::new("sda2", DeviceKind::Partition, 40 * GIB);
        home.parents = vec!["sda".to_string()];
        home.partition_number = Some(2);
        home.format = Some(FormatKind::Filesystem(FilesystemType::Xfs));
        home.uuid = Some("2222".to_string());
        let mut resolver = resolver(vec![gpt_disk("sda"), root, home]);

        let config = config(
            r#"
            [storage.disk.sda]
            match = { name = "sda" }

            [storage.partition.root]
            targetDevice = "disk.sda"
            uuid = "1111"

            [storage.partition.home]
            targetDevice = "disk.sda"

            [storage.btrfs]

            [fileSystems."/home"]
            storage = "partition.home"
            uuid = "2222"

            [fileSystems."/"]
            storage = "partition.root"
            "#,
        );
        let mounted = resolver.mount_only(&config, Path::new("/mnt")).unwrap();
        let targets: Vec<&Path> = mounted.iter().map(|(_, path)| path.as_path()).collect();
        assert_eq!(targets, [Path::new("/mnt/"), Path::new("/mnt/home")]);
        assert!(resolver.engine().actions().is_empty());
    }

    #[test]
    fn mount_only_needs_a_uuid() {
        let mut resolver = resolver(vec![gpt_disk("sda")]);
        let config = config(
            r#"
            [storage.disk.sda]
            match = { name = "sda" }

            [storage.partition.root]
            targetDevice = "disk.sda"

            [storage.btrfs]

            [fileSystems."/"]
            storage = "partition.root"
            "#,
        );
        let error = resolver
            .mount_only(&config, Path::new("/mnt"))
            .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::MissingUuid));
    }

    #[test]
    fn plans_render_one_numbered_line_per_action() {
        let mut resolver = resolver(vec![gpt_disk("sda")]);
        let script: KickstartScript = toml::from_str(
            r#"
            version = "F19"

            [[commands]]
            command = "part"
            mountpoint = "/boot"
            ondisk = "sda"
            size = 1024
            "#,
        )
        .unwrap();
        let plan = resolver.plan_commands(&script).unwrap();
        let rendered = plan.to_string();
        assert!(rendered.starts_with("  1. create device sda1"));
        assert_eq!(rendered.lines().count(), plan.actions.len());
    }

    #[test]
    fn clearing_without_usable_disks_plans_nothing() {
        let mut sda = gpt_disk("sda");
        sda.protected = true;
        let mut loop0 = InventoryDevice::new("loop0", DeviceKind::Loop, 4 * GIB);
        loop0.format = Some(FormatKind::Filesystem(FilesystemType::Ext4));
        let mut resolver = resolver(vec![sda, loop0]);
        let script: KickstartScript = toml::from_str(
            r#"
            [[commands]]
            command = "clearpart"
            type = "list"
            devices = ["loop0"]
            "#,
        )
        .unwrap();

        let plan = resolver.plan_commands(&script).unwrap();
        assert!(plan.actions.is_empty());
        assert!(resolver.engine().by_name("loop0").is_some());
    }
}
