//! Runs with every call pushed through JSON, as a remote channel would.

mod common;

use distdevs::config::{NetworkConfig, SupervisorConfig};
use distdevs::model::ModelOps;
use distdevs::wrapper::ModelWrapper;
use distdevs::{
    Connection, ContractError, EndpointRole, EndpointUri, Event, EventType, ModelUri, SimDuration, SimError,
    SimTime, SimulationReport, Supervisor,
};

use common::{deploy, house, nested_house};

fn run(encode_messages: bool, architecture: distdevs::ArchitectureDescriptor) -> (SimulationReport, u64) {
    let hosts = deploy(NetworkConfig { encode_messages }, 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(architecture).unwrap();
    let report = supervisor
        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(24.0))
        .unwrap();
    supervisor.reinitialise().unwrap();
    (report, hosts.network.calls())
}

#[test]
fn encoded_runs_match_direct_runs() {
    let (direct, direct_calls) = run(false, house());
    let (encoded, encoded_calls) = run(true, house());
    assert_eq!(direct, encoded);
    assert_eq!(direct_calls, encoded_calls);
    assert!(encoded_calls > 0);
}

#[test]
fn nested_trees_survive_encoding() {
    let (direct, _) = run(false, nested_house());
    let (encoded, _) = run(true, nested_house());
    assert_eq!(direct, encoded);
    assert_eq!(encoded.total_transitions(), 24);
}

#[test]
fn failures_cross_the_wire_unchanged() {
    let hosts = deploy(NetworkConfig { encode_messages: true }, 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(house()).unwrap();

    let endpoint = EndpointUri::for_unit(hosts.meter.address(), &ModelUri::new("meter"), EndpointRole::ModelAccess);
    let connection = Connection::open(&hosts.network.transport(), endpoint).unwrap();
    let mut meter = ModelWrapper::new(connection, ModelUri::new("meter")).unwrap();
    let event = Event::new(
        EventType::new("Command"),
        ModelUri::new("ac"),
        SimTime::ZERO,
        serde_json::Value::Null,
    );
    let err = meter
        .store_input(&ModelUri::new("meter"), vec![event])
        .unwrap_err();
    assert_eq!(
        err,
        SimError::Contract(ContractError::EventNotImported {
            model: ModelUri::new("meter"),
            event_type: EventType::new("Command"),
        })
    );
}
