use storage_contracts::StorageEngine;
use storage_resolver::error::{ResolveError, SpecLocation, Violation};
use storage_resolver::size::{self, CONFIG_UNIT, ResolvedSize};
use storage_resolver::{NoProbe, matcher, reclaim, resize};
use storage_testing::lab;
use storage_types::{ActionKind, GIB, MatchCriteria, RefKind, SizeExpression};

fn here() -> SpecLocation {
    SpecLocation::storage(RefKind::Partition, "p")
}

#[test]
fn unit_maps_are_summed() {
    let expr: SizeExpression = serde_json::from_str(r#"{"mb": 10, "yb": 4}"#).unwrap();
    let resolved = size::resolve(&expr, CONFIG_UNIT, &here()).unwrap();
    assert_eq!(
        resolved,
        ResolvedSize::Fixed(10_000_000 + 4 * 10u128.pow(24))
    );
}

#[test]
fn unknown_units_name_the_unit() {
    let expr: SizeExpression = serde_json::from_str(r#"{"gib": 1, "parsecs": 2}"#).unwrap();
    let error = size::resolve(&expr, CONFIG_UNIT, &here()).unwrap_err();
    assert!(matches!(
        error,
        ResolveError::InvalidSizeUnit { ref unit, .. } if unit == "parsecs"
    ));
}

#[test]
fn matching_is_deterministic_and_prioritised() {
    let tree = lab::tree("2disk").unwrap();
    let criteria = MatchCriteria {
        name: Some("sdb".to_string()),
        uuid: Some("5c0a6a5e-2222-4d8b-9a42-8d0f0e2f6a02".to_string()),
        physical_pos: Some(1),
        ..MatchCriteria::default()
    };
    let sdb = tree.by_name("sdb");
    for _ in 0..3 {
        assert_eq!(
            matcher::resolve(&tree, &NoProbe, &criteria, "data").unwrap(),
            sdb
        );
    }

    let by_position = MatchCriteria {
        physical_pos: Some(2),
        ..MatchCriteria::default()
    };
    assert_eq!(
        matcher::resolve(&tree, &NoProbe, &by_position, "data").unwrap(),
        sdb
    );
    assert_eq!(
        matcher::resolve(&tree, &NoProbe, &MatchCriteria::default(), "sda").unwrap(),
        tree.by_name("sda")
    );
    assert_eq!(
        matcher::resolve(&tree, &NoProbe, &MatchCriteria::by_name("sdz"), "sdz").unwrap(),
        None
    );
}

#[test]
fn match_scripts_need_a_probe() {
    let tree = lab::tree("1disk").unwrap();
    let criteria = MatchCriteria {
        script: Some("/usr/libexec/pick-disk".to_string()),
        ..MatchCriteria::default()
    };
    assert!(matches!(
        matcher::resolve(&tree, &NoProbe, &criteria, "sda"),
        Err(ResolveError::Io { .. })
    ));
}

#[test]
fn reclaiming_removes_the_owner_and_nothing_else() {
    let mut tree = lab::tree("2disk").unwrap();
    reclaim::reclaim(&mut tree, "/home").unwrap();
    assert_eq!(lab::summary(tree.actions()), ["destroy device fedora-home"]);
    assert_eq!(tree.mountpoint_owner("/home"), None);
    assert!(tree.mountpoint_owner("/").is_some());

    reclaim::reclaim(&mut tree, "/srv").unwrap();
    assert_eq!(tree.actions().len(), 1);
}

#[test]
fn destroying_a_group_takes_its_volumes_first() {
    let mut tree = lab::tree("2disk").unwrap();
    let vg = tree.by_name("fedora").unwrap();
    reclaim::destroy_tree(&mut tree, vg).unwrap();
    let summary = lab::summary(tree.actions());
    assert_eq!(summary.len(), 3);
    assert_eq!(summary[2], "destroy device fedora");
    assert!(tree.by_name("sda2").is_some());
}

#[test]
fn shrinking_resizes_the_format_first() {
    let mut tree = lab::tree("2disk").unwrap();
    let home = tree.by_name("fedora-home").unwrap();
    resize::resize(&mut tree, home, 10 * GIB, &here()).unwrap();
    let kinds: Vec<ActionKind> = tree.actions().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, [ActionKind::ResizeFormat, ActionKind::ResizeDevice]);
}

#[test]
fn growing_resizes_the_device_first() {
    let mut tree = lab::tree("2disk").unwrap();
    let root = tree.by_name("fedora-root").unwrap();
    resize::resize(&mut tree, root, 22 * GIB, &here()).unwrap();
    let kinds: Vec<ActionKind> = tree.actions().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, [ActionKind::ResizeDevice, ActionKind::ResizeFormat]);
}

#[test]
fn resizing_to_the_current_size_counts_as_growing() {
    let mut tree = lab::tree("2disk").unwrap();
    let home = tree.by_name("fedora-home").unwrap();
    resize::resize(&mut tree, home, 16 * GIB, &here()).unwrap();
    let kinds: Vec<ActionKind> = tree.actions().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, [ActionKind::ResizeDevice, ActionKind::ResizeFormat]);
}

#[test]
fn impossible_resizes_are_refused() {
    let mut tree = lab::tree("2disk").unwrap();
    let home = tree.by_name("fedora-home").unwrap();
    let error = resize::resize(&mut tree, home, GIB, &here()).unwrap_err();
    assert!(matches!(error, ResolveError::InvalidResizeTarget { .. }));

    let root = tree.by_name("fedora-root").unwrap();
    let error = resize::resize(&mut tree, root, 10 * GIB, &here()).unwrap_err();
    assert!(matches!(error, ResolveError::InvalidResizeTarget { .. }));
    assert!(tree.actions().is_empty());
}

#[test]
fn invalid_mountpoints_produce_no_actions() {
    let mut resolver = lab::resolver("1disk").unwrap();
    let config = lab::config(
        r#"
        [storage.disk.sda]
        match = { name = "sda" }

        [storage.partition.data]
        targetDevice = "disk.sda"
        size = { gib = 4 }

        [storage.btrfs]

        [fileSystems."srv/data"]
        storage = "partition.data"
        fsType = "ext4"
        "#,
    )
    .unwrap();
    let error = resolver.plan(&config).unwrap_err();
    assert!(matches!(
        error.violation(),
        Some(Violation::InvalidMountpoint(_))
    ));
    assert!(resolver.engine().actions().is_empty());
}

#[test]
fn composites_without_members_are_rejected() {
    let mut resolver = lab::resolver("3disk").unwrap();
    let config = lab::config(
        r#"
        [storage.disk.sda]
        match = { name = "sda" }

        [storage.partition]

        [storage.btrfs]

        [storage.raid.md0]
        level = "raid1"
        devices = []

        [fileSystems."/srv"]
        storage = "raid.md0"
        fsType = "xfs"
        "#,
    )
    .unwrap();
    let error = resolver.plan(&config).unwrap_err();
    assert_eq!(error.violation(), Some(&Violation::NoMembers));
    assert!(resolver.engine().actions().is_empty());
}

#[test]
fn protected_disks_are_never_partitioned() {
    let mut resolver = lab::resolver("3disk").unwrap();
    let config = lab::config(
        r#"
        [storage.disk.stick]
        match = { name = "sdd" }
        clear = true

        [storage.partition.data]
        targetDevice = "disk.stick"
        size = { gib = 1 }

        [storage.btrfs]

        [fileSystems."/srv"]
        storage = "partition.data"
        fsType = "ext4"
        "#,
    )
    .unwrap();
    assert!(resolver.plan(&config).is_err());
    assert!(resolver.engine().actions().is_empty());
}
