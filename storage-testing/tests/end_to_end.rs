use std::path::Path;

use storage_contracts::StorageEngine;
use storage_testing::lab;
use storage_types::{ActionKind, DeviceKind, FormatKind};

const ROOT_FILL: &str = r#"
[storage.disk.sda]
match = { name = "sda" }

[storage.partition.root]
targetDevice = "disk.sda"
size = "fill"

[storage.btrfs]

[fileSystems."/"]
storage = "partition.root"
fsType = "ext4"
"#;

#[test]
fn root_fills_a_blank_disk() {
    let mut resolver = lab::resolver("1disk").unwrap();
    let plan = resolver.plan(&lab::config(ROOT_FILL).unwrap()).unwrap();

    let kinds: Vec<ActionKind> = plan.actions.iter().map(|action| action.kind).collect();
    assert_eq!(kinds, [ActionKind::Create, ActionKind::CreateFormat]);
    assert!(plan.actions[0].request().unwrap().grow);
    let format = plan.actions[1].format().unwrap();
    assert_eq!(format.kind.name(), "ext4");
    assert_eq!(format.mountpoint.as_deref(), Some("/"));
    assert!(plan.deferred_mounts.is_empty());
}

#[test]
fn planning_twice_gives_the_same_plan() {
    let mut resolver = lab::resolver("1disk").unwrap();
    let config = lab::config(ROOT_FILL).unwrap();
    let first = resolver.plan(&config).unwrap();
    let second = resolver.plan(&config).unwrap();
    assert_eq!(first.actions, second.actions);
}

#[test]
fn new_root_on_the_data_disk_replaces_the_installed_one() {
    let mut resolver = lab::resolver("2disk").unwrap();
    let plan = resolver
        .plan(
            &lab::config(
                r#"
                [storage.disk.data]
                match = { name = "sdb" }
                clear = true

                [storage.partition.root]
                targetDevice = "disk.data"
                size = "fill"

                [storage.btrfs]

                [fileSystems."/"]
                storage = "partition.root"
                fsType = "xfs"
                "#,
            )
            .unwrap(),
        )
        .unwrap();

    let summary = lab::summary(&plan.actions);
    assert!(summary.contains(&"destroy device fedora-root".to_string()));
    assert!(!summary.iter().any(|line| line.ends_with("fedora-home")));

    let engine = resolver.engine();
    assert!(engine.by_name("fedora-root").is_none());
    assert!(engine.by_name("fedora-home").is_some());
    let owner = engine.mountpoint_owner("/").unwrap();
    let sdb = engine.by_name("sdb").unwrap();
    assert_eq!(engine.device(owner).unwrap().parents, [sdb]);
}

#[test]
fn a_second_pass_supersedes_the_first() {
    let mut resolver = lab::resolver("1disk").unwrap();
    let first = lab::config(
        r#"
        [storage.disk.sda]
        match = { name = "sda" }

        [storage.partition.pv]
        targetDevice = "disk.sda"
        size = { gib = 20 }

        [storage.btrfs]

        [storage.volgroup.vg]
        devices = ["partition.pv"]

        [storage.logvol.a]
        volgroup = "volgroup.vg"
        size = { gib = 2 }

        [fileSystems."/data"]
        storage = "logvol.a"
        fsType = "xfs"
        "#,
    )
    .unwrap();
    resolver.realize(&first).unwrap();
    let a = resolver.engine().by_name("vg-a").unwrap();
    assert_eq!(resolver.engine().mountpoint_owner("/data"), Some(a));

    let second = lab::config(
        r#"
        [storage.disk.sda]
        match = { name = "sda" }

        [storage.partition]

        [storage.btrfs]

        [storage.volgroup.vg]
        useExisting = true

        [storage.logvol.b]
        volgroup = "volgroup.vg"
        size = { gib = 2 }

        [fileSystems."/data"]
        storage = "logvol.b"
        fsType = "xfs"
        "#,
    )
    .unwrap();
    let plan = resolver.plan(&second).unwrap();

    assert_eq!(plan.actions[0].kind, ActionKind::Destroy);
    assert_eq!(plan.actions[0].device, a);
    let engine = resolver.engine();
    assert!(engine.by_name("vg-a").is_none());
    assert_eq!(engine.mountpoint_owner("/data"), engine.by_name("vg-b"));
}

#[test]
fn raid_script_leaves_the_install_stick_alone() {
    let mut resolver = lab::resolver("3disk").unwrap();
    let script = lab::script(
        r#"
        version = "F19"

        [[commands]]
        command = "clearpart"
        type = "all"
        initlabel = true

        [[commands]]
        command = "part"
        mountpoint = "raid.01"
        ondisk = "sda"
        size = 10240

        [[commands]]
        command = "part"
        mountpoint = "raid.02"
        ondisk = "sdb"
        size = 10240

        [[commands]]
        command = "part"
        mountpoint = "raid.03"
        ondisk = "sdc"
        size = 10240

        [[commands]]
        command = "raid"
        mountpoint = "/"
        device = "md0"
        level = "raid5"
        members = ["raid.01", "raid.02", "raid.03"]
        fstype = "xfs"
        "#,
    )
    .unwrap();
    let plan = resolver.plan_commands(&script).unwrap();

    assert!(plan.actions.iter().all(|action| action.target != "sdd"));
    let engine = resolver.engine();
    let md0 = engine.by_name("md0").unwrap();
    let array = engine.device(md0).unwrap();
    assert_eq!(array.kind, DeviceKind::MdArray);
    assert_eq!(array.parents.len(), 3);
    assert_eq!(engine.mountpoint_owner("/"), Some(md0));
    for member in &array.parents {
        assert_eq!(
            engine.device(*member).unwrap().format_kind(),
            Some(FormatKind::MdMember)
        );
    }
}

#[test]
fn unsupported_commands_are_rejected_before_anything_changes() {
    let mut resolver = lab::resolver("1disk").unwrap();
    let script = lab::script(
        r#"
        version = "RHEL6"

        [[commands]]
        command = "btrfs"
        mountpoint = "/"
        devices = ["sda"]
        "#,
    )
    .unwrap();
    assert!(resolver.plan_commands(&script).is_err());
    assert!(resolver.engine().actions().is_empty());
}

#[test]
fn autopart_builds_lvm_over_cleared_disks() {
    let mut resolver = lab::resolver("2disk").unwrap();
    let script = lab::script(
        r#"
        [[commands]]
        command = "clearpart"
        type = "all"
        initlabel = true

        [[commands]]
        command = "autopart"
        type = "lvm"
        "#,
    )
    .unwrap();
    resolver.plan_commands(&script).unwrap();

    let engine = resolver.engine();
    assert!(engine.by_name("fedora").is_none());
    let root = engine.mountpoint_owner("/").unwrap();
    assert_eq!(engine.device(root).unwrap().kind, DeviceKind::LogicalVolume);
    let boot = engine.mountpoint_owner("/boot").unwrap();
    assert_eq!(engine.device(boot).unwrap().kind, DeviceKind::Partition);
    let groups = engine
        .devices()
        .iter()
        .filter(|device| device.kind == DeviceKind::VolumeGroup)
        .count();
    assert_eq!(groups, 1);
}

#[test]
fn mount_only_follows_filesystem_uuids() {
    let mut resolver = lab::resolver("2disk").unwrap();
    let config = lab::config(
        r#"
        [storage.disk.sda]
        match = { name = "sda" }

        [storage.partition]

        [storage.btrfs]

        [fileSystems."/home"]
        storage = "logvol.home"
        uuid = "5c0a6a5e-3333-4d8b-9a42-8d0f0e2f6a03"

        [fileSystems."/boot"]
        storage = "partition.boot"
        uuid = "5c0a6a5e-1111-4d8b-9a42-8d0f0e2f6a01"

        [fileSystems."/"]
        storage = "logvol.root"
        uuid = "5c0a6a5e-2222-4d8b-9a42-8d0f0e2f6a02"
        "#,
    )
    .unwrap();
    let mounted = resolver
        .mount_only(&config, Path::new("/mnt/sysimage"))
        .unwrap();

    let engine = resolver.engine();
    let names: Vec<&str> = mounted
        .iter()
        .map(|(device, _)| engine.device(*device).unwrap().name.as_str())
        .collect();
    assert_eq!(names, ["fedora-root", "sda1", "fedora-home"]);
    assert_eq!(mounted[2].1, Path::new("/mnt/sysimage/home"));
    assert!(engine.actions().is_empty());
}

#[test]
fn ignored_disks_survive_a_listed_clear() {
    let mut resolver = lab::resolver("2disk").unwrap();
    let script = lab::script(
        r#"
        [[commands]]
        command = "ignoredisk"
        drives = ["sda", "sdb"]

        [[commands]]
        command = "clearpart"
        type = "list"
        devices = ["sda1"]
        "#,
    )
    .unwrap();
    let plan = resolver.plan_commands(&script).unwrap();

    assert!(plan.actions.is_empty());
    assert!(resolver.engine().by_name("sda1").is_some());
}
