use storage_contracts::StorageEngine;
use storage_testing::{errors::TestingError, lab, spec};

#[test]
fn every_lab_spec_loads_and_seeds_a_tree() {
    let names = spec::spec_names().unwrap();
    assert!(names.contains(&"1disk".to_string()));

    for name in names {
        let lab_spec = spec::load_by_name(&name).unwrap();
        assert_eq!(lab_spec.name, name, "spec file name and name key differ");
        let tree = lab::tree(&name).unwrap();
        assert_eq!(tree.devices().len(), lab_spec.devices.len(), "{name}");
        assert!(tree.actions().is_empty(), "{name}");
        assert!(!tree.disks().is_empty(), "{name}");
    }
}

#[test]
fn unknown_specs_are_reported_by_name() {
    assert!(matches!(
        spec::load_by_name("no-such-lab"),
        Err(TestingError::SpecNotFound { spec_name }) if spec_name == "no-such-lab"
    ));
}

#[test]
fn installed_system_exposes_its_mountpoints() {
    let tree = lab::tree("2disk").unwrap();
    for (mountpoint, owner) in [("/", "fedora-root"), ("/home", "fedora-home"), ("/boot", "sda1")] {
        assert_eq!(tree.mountpoint_owner(mountpoint), tree.by_name(owner));
    }
}
