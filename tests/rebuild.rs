//! Tearing unit trees down and building them again.

mod common;

use distdevs::config::{NetworkConfig, SupervisorConfig};
use distdevs::{ModelUri, RunManagement, SimDuration, SimTime, Supervisor, SupervisorState};

use common::{deploy, house, nested_house, Deployment};

fn uris(names: &[&str]) -> Vec<ModelUri> {
    names.iter().map(|n| ModelUri::new(*n)).collect()
}

/// Parent/child edges of the coordinators currently installed.
fn tree(hosts: &Deployment) -> Vec<(ModelUri, Vec<ModelUri>)> {
    [&hosts.house, &hosts.kitchen]
        .into_iter()
        .filter_map(|host| host.coordinator_unit().unwrap())
        .map(|unit| (unit.model_uri().clone(), unit.child_uris().unwrap()))
        .collect()
}

#[test]
fn nested_tree_runs_like_the_flat_one() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(nested_house()).unwrap();

    assert_eq!(
        tree(&hosts),
        vec![
            (ModelUri::new("house"), uris(&["kitchen", "meter"])),
            (ModelUri::new("kitchen"), uris(&["ac"])),
        ]
    );
    let kitchen = hosts.kitchen.coordinator_unit().unwrap().unwrap();
    assert!(kitchen.is_simulator_set().unwrap());
    assert_eq!(kitchen.connection_counts().unwrap(), (1, 1));

    let report = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(24.0))
        .unwrap();
    assert_eq!(report.total_transitions(), 24);
    let kitchen_report = report.find(&ModelUri::new("kitchen")).unwrap();
    assert_eq!(kitchen_report.total_transitions(), 12);
    assert!(kitchen_report.find(&ModelUri::new("ac")).is_some());
}

#[test]
fn reinitialise_then_construct_rebuilds_the_same_tree() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();

    supervisor.construct_simulator(nested_house()).unwrap();
    let before = tree(&hosts);
    let first = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(12.0))
        .unwrap();

    supervisor.reinitialise().unwrap();
    assert!(tree(&hosts).is_empty());
    assert_eq!(supervisor.state().unwrap(), SupervisorState::Disconnected);

    supervisor.construct_simulator(nested_house()).unwrap();
    assert_eq!(tree(&hosts), before);
    let second = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(12.0))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn reinitialise_is_idempotent() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();

    let coordinator = hosts.house.coordinator_unit().unwrap().unwrap();
    coordinator.reinitialise().unwrap();
    coordinator.reinitialise().unwrap();
    assert!(!coordinator.is_simulator_set().unwrap());

    supervisor.reinitialise().unwrap();
    supervisor.reinitialise().unwrap();
    assert!(hosts.house.coordinator_unit().unwrap().is_none());
}

#[test]
fn constructing_twice_is_refused() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();

    let err = supervisor.construct_simulator(house()).unwrap_err();
    assert!(err.is_precondition());

    let coordinator = hosts.house.coordinator_unit().unwrap().unwrap();
    let err = coordinator
        .construct_simulator(&ModelUri::new("house"), &house())
        .unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(supervisor.state().unwrap(), SupervisorState::SimulatorBuilt);
}

#[test]
fn reset_architecture_swaps_the_tree() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(nested_house()).unwrap();
    assert!(hosts.kitchen.coordinator_unit().unwrap().is_some());

    supervisor.reset_architecture(house()).unwrap();
    assert!(hosts.kitchen.coordinator_unit().unwrap().is_none());
    assert_eq!(
        tree(&hosts),
        vec![(ModelUri::new("house"), uris(&["ac", "meter"]))]
    );
    assert_eq!(
        supervisor.architecture().unwrap().unwrap().uri().as_str(),
        "house-arch"
    );

    let report = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(24.0))
        .unwrap();
    assert_eq!(report.total_transitions(), 24);
}
