//! End-to-end standalone runs of the house architecture.

mod common;

use distdevs::config::{NetworkConfig, SupervisorConfig};
use distdevs::{
    EndpointRole, EndpointUri, Event, EventType, ModelUri, ReportDetail, RunManagement, SimDuration, SimTime,
    Supervisor, SupervisorState,
};

use common::{deploy, house, readings};

fn transitions(report: &distdevs::SimulationReport, uri: &str) -> (u64, u64) {
    match &report.find(&ModelUri::new(uri)).unwrap().detail {
        ReportDetail::Atomic {
            internal_transitions,
            external_transitions,
            ..
        } => (*internal_transitions, *external_transitions),
        ReportDetail::Coupled { .. } => panic!("{uri} is not atomic"),
    }
}

#[test]
fn house_runs_for_a_day() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();

    supervisor.construct_simulator(house()).unwrap();
    assert_eq!(supervisor.state().unwrap(), SupervisorState::SimulatorBuilt);
    assert!(supervisor.session().unwrap().is_some());
    assert!(hosts.ac.atomic_unit().unwrap().unwrap().is_simulator_set().unwrap());
    assert!(hosts.meter.atomic_unit().unwrap().unwrap().is_simulator_set().unwrap());

    supervisor
        .initialise_simulation(None, SimDuration::new(24.0))
        .unwrap();
    let report = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(24.0))
        .unwrap();
    assert_eq!(report.model, ModelUri::new("house"));
    assert_eq!(report.end_time, SimTime::new(24.0));
    assert_eq!(transitions(&report, "ac"), (12, 0));
    assert_eq!(transitions(&report, "meter"), (0, 12));
    assert_eq!(report.total_transitions(), 24);

    let meter = report.find(&ModelUri::new("meter")).unwrap();
    let ReportDetail::Atomic { summary, .. } = &meter.detail else {
        panic!("meter is atomic");
    };
    assert_eq!(readings(summary), 12);

    assert_eq!(supervisor.final_report().unwrap(), report);
    assert_eq!(supervisor.state().unwrap(), SupervisorState::Idle);
    supervisor.reinitialise().unwrap();
}

#[test]
fn coordinator_keeps_connection_symmetry() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();

    let coordinator = hosts.house.coordinator_unit().unwrap().unwrap();
    assert_eq!(
        coordinator.child_uris().unwrap(),
        vec![ModelUri::new("ac"), ModelUri::new("meter")]
    );
    assert_eq!(coordinator.connection_counts().unwrap(), (2, 2));

    supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(6.0))
        .unwrap();
    assert_eq!(coordinator.connection_counts().unwrap(), (2, 2));

    supervisor.reinitialise().unwrap();
    assert_eq!(coordinator.connection_counts().unwrap(), (0, 0));
    assert!(hosts.house.coordinator_unit().unwrap().is_none());
    assert!(!hosts.ac.atomic_unit().unwrap().unwrap().is_simulator_set().unwrap());
}

#[test]
fn parent_model_link_is_set_once_per_construction() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();

    let ac = hosts.ac.atomic_unit().unwrap().unwrap();
    assert_eq!(ac.parent_uri().unwrap(), Some(ModelUri::new("house")));
    let parent = EndpointUri::for_unit(
        hosts.house.address(),
        &ModelUri::new("house"),
        EndpointRole::ModelAccess,
    );
    let err = ac.set_parent_model(&parent).unwrap_err();
    assert!(err.is_precondition());

    supervisor.reinitialise().unwrap();
    assert_eq!(ac.parent_uri().unwrap(), None);
}

#[test]
fn commands_routed_through_the_house_reach_the_air_conditioner() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();
    supervisor
        .initialise_simulation(Some(SimTime::ZERO), SimDuration::new(10.0))
        .unwrap();

    let coordinator = hosts.house.coordinator_unit().unwrap().unwrap();
    let house_uri = ModelUri::new("house");
    coordinator
        .trigger_external_event(&house_uri, |time| {
            Event::new(EventType::new("Command"), house_uri.clone(), time, serde_json::json!("cool"))
        })
        .unwrap();

    let report = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(10.0))
        .unwrap();
    assert_eq!(transitions(&report, "ac"), (5, 1));
    assert_eq!(transitions(&report, "meter"), (0, 5));

    let err = coordinator
        .trigger_external_event(&ModelUri::new("fridge"), |time| {
            Event::new(EventType::new("Command"), ModelUri::new("house"), time, serde_json::Value::Null)
        })
        .unwrap_err();
    assert!(err.is_precondition());
}

#[test]
fn second_run_starts_from_a_fresh_state() {
    let hosts = deploy(NetworkConfig::default(), 1.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();

    let first = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(4.0))
        .unwrap();
    let second = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(4.0))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(second.total_transitions(), 8);
}

#[test]
fn construction_fails_when_a_child_host_is_missing() {
    let hosts = deploy(NetworkConfig::default(), 1.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    let common::Deployment {
        ac, meter, house: house_host, ..
    } = hosts;
    drop(meter);

    let err = supervisor.construct_simulator(house()).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(supervisor.state().unwrap(), SupervisorState::Disconnected);
    assert!(house_host.coordinator_unit().unwrap().is_none());
    assert!(!ac.atomic_unit().unwrap().unwrap().is_simulator_set().unwrap());
    assert!(ac.atomic_unit().unwrap().unwrap().architecture().unwrap().is_none());
}
