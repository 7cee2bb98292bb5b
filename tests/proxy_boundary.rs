//! Proxies forward the remotable surface and refuse local step execution.

mod common;

use std::collections::BTreeSet;

use distdevs::bootstrap::{connect_component, connect_management_port};
use distdevs::config::{NetworkConfig, SupervisorConfig};
use distdevs::engine::EngineOps;
use distdevs::model::ModelOps;
use distdevs::transport::{ModelRequest, Request};
use distdevs::wrapper::{CoupledModelWrapper, ModelWrapper, SimulatorWrapper};
use distdevs::{
    Connection, EndpointRole, EndpointUri, Event, EventType, HostAddress, ModelDescriptor, ModelUri, SimDuration,
    SimError, SimTime, Supervisor, TimeUnit, TransportError,
};

use common::{deploy, nested_house};

fn endpoint(host: &str, model: &str, role: EndpointRole) -> EndpointUri {
    EndpointUri::for_unit(&HostAddress::new(host), &ModelUri::new(model), role)
}

fn built() -> (common::Deployment, Supervisor) {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let supervisor = Supervisor::new(&hosts.network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(nested_house()).unwrap();
    (hosts, supervisor)
}

#[test]
fn remote_atomic_models_refuse_local_execution() {
    let (hosts, _supervisor) = built();
    let transport = hosts.network.transport();
    let connection = Connection::open(&transport, endpoint("host-ac", "ac", EndpointRole::ModelAccess)).unwrap();
    let mut ac = ModelWrapper::new(connection, ModelUri::new("ac")).unwrap();

    assert_eq!(ac.uri().unwrap(), ModelUri::new("ac"));
    assert!(!ac.is_coupled().unwrap());
    assert_eq!(
        ac.imported_event_types().unwrap(),
        BTreeSet::from([EventType::new("Command")])
    );
    assert!(ac.is_exported_event_type(&EventType::new("PowerChanged")).unwrap());
    assert_eq!(ac.time_unit().unwrap(), TimeUnit::Hours);

    let err = ac.as_local().err().unwrap();
    assert!(err.is_cross_boundary());
    assert_eq!(
        err,
        SimError::CrossBoundary {
            operation: "as_local".to_string(),
            uri: ModelUri::new("ac"),
        }
    );
}

#[test]
fn coupled_wrappers_forward_descendant_queries() {
    let (hosts, _supervisor) = built();
    let transport = hosts.network.transport();
    let connection =
        Connection::open(&transport, endpoint("host-house", "house", EndpointRole::ModelAccess)).unwrap();
    let mut house = CoupledModelWrapper::new(connection, ModelUri::new("house")).unwrap();

    assert!(house.is_coupled().unwrap());
    assert!(house.is_descendant(&ModelUri::new("kitchen")).unwrap());
    assert!(house.is_descendant(&ModelUri::new("ac")).unwrap());
    assert!(!house.is_descendant(&ModelUri::new("fridge")).unwrap());
    assert!(!house.is_descendant(&ModelUri::new("house")).unwrap());
    assert!(house.as_local().err().unwrap().is_cross_boundary());
}

#[test]
fn remote_engines_answer_time_queries() {
    let (hosts, supervisor) = built();
    supervisor
        .initialise_simulation(Some(SimTime::new(3.0)), SimDuration::new(10.0))
        .unwrap();
    let transport = hosts.network.transport();
    let connection = Connection::open(&transport, endpoint("host-ac", "ac", EndpointRole::EngineAccess)).unwrap();
    let ac = SimulatorWrapper::new(connection, ModelUri::new("ac")).unwrap();

    assert_eq!(ac.time_of_last_event().unwrap(), SimTime::new(3.0));
    assert_eq!(ac.time_of_next_event().unwrap(), SimTime::new(5.0));
    assert_eq!(ac.current_time().unwrap(), SimTime::new(3.0));
}

#[test]
fn wrappers_check_who_answers() {
    let (hosts, _supervisor) = built();
    let transport = hosts.network.transport();
    let connection = Connection::open(&transport, endpoint("host-ac", "ac", EndpointRole::ModelAccess)).unwrap();
    let err = ModelWrapper::new(connection, ModelUri::new("meter")).unwrap_err();
    assert!(matches!(err, SimError::Transport(TransportError::UnexpectedReply { .. })));
}

#[test]
fn store_input_succeeds_only_for_imported_types() {
    let (hosts, _supervisor) = built();
    let transport = hosts.network.transport();
    let connection =
        Connection::open(&transport, endpoint("host-meter", "meter", EndpointRole::ModelAccess)).unwrap();
    let mut meter = ModelWrapper::new(connection, ModelUri::new("meter")).unwrap();
    let event = |name: &str| Event::new(EventType::new(name), ModelUri::new("ac"), SimTime::ZERO, serde_json::json!(1));

    meter
        .store_input(&ModelUri::new("meter"), vec![event("PowerChanged")])
        .unwrap();
    let err = meter
        .store_input(&ModelUri::new("meter"), vec![event("Command")])
        .unwrap_err();
    assert!(err.is_contract());
    let err = meter
        .store_input(&ModelUri::new("ac"), vec![event("PowerChanged")])
        .unwrap_err();
    assert!(err.is_precondition());
}

#[test]
fn empty_hosts_expose_no_management_port() {
    let hosts = deploy(NetworkConfig::default(), 2.0);
    let transport = hosts.network.transport();
    let descriptor = ModelDescriptor::atomic("fridge", "host-kitchen");
    let handle = connect_component(&transport, &descriptor).unwrap();
    let err = connect_management_port(&handle, &descriptor.uri).unwrap_err();
    assert!(matches!(
        err,
        SimError::Transport(TransportError::EndpointNotFound { .. })
    ));
    assert!(err.is_retryable());
    handle.disconnect();
}

#[test]
fn disconnected_connections_refuse_calls() {
    let (hosts, _supervisor) = built();
    let transport = hosts.network.transport();
    let connection = Connection::open(&transport, endpoint("host-ac", "ac", EndpointRole::ModelAccess)).unwrap();
    assert!(connection.is_open());
    connection.disconnect();
    assert!(!connection.is_open());
    let err = connection.call(Request::Model(ModelRequest::Uri)).unwrap_err();
    assert!(matches!(err, SimError::Transport(TransportError::ConnectionClosed { .. })));
}
