//! Shared fixtures for integration tests: a toy air conditioner and energy
//! meter, the house architectures they take part in, and host deployment.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use distdevs::config::{NetworkConfig, RealTimeConfig};
use distdevs::model::{AtomicBehavior, BehaviorFactory};
use distdevs::{
    ArchitectureDescriptor, Emission, Event, EventType, Host, InProcessNetwork, ModelDescriptor, SimDuration,
    SimTime, TimeUnit,
};

/// Toggles its compressor every `period` and announces the new power draw.
pub struct AirConditioner {
    period: f64,
    remaining: f64,
    on: bool,
    commands: u64,
}

impl AirConditioner {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            remaining: period,
            on: false,
            commands: 0,
        }
    }
}

impl AtomicBehavior for AirConditioner {
    fn imported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::new("Command")])
    }

    fn exported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::new("PowerChanged")])
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.remaining = self.period;
        self.on = false;
        self.commands = 0;
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::new(self.remaining)
    }

    fn output(&self, _time: SimTime) -> Vec<Emission> {
        let watts = if self.on { 0.0 } else { 1500.0 };
        vec![Emission::new("PowerChanged", json!({ "watts": watts }))]
    }

    fn internal_transition(&mut self, _time: SimTime) {
        self.on = !self.on;
        self.remaining = self.period;
    }

    fn external_transition(&mut self, _time: SimTime, elapsed: SimDuration, events: &[Event]) {
        self.commands += events.len() as u64;
        self.remaining = (self.remaining - elapsed.value()).max(0.0);
    }

    fn report(&self) -> serde_json::Value {
        json!({ "on": self.on, "commands": self.commands })
    }
}

/// Passive model summing the power readings it receives.
#[derive(Default)]
pub struct EnergyMeter {
    readings: u64,
    last_watts: f64,
}

impl AtomicBehavior for EnergyMeter {
    fn imported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::new("PowerChanged")])
    }

    fn exported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::new()
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.readings = 0;
        self.last_watts = 0.0;
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::INFINITY
    }

    fn output(&self, _time: SimTime) -> Vec<Emission> {
        Vec::new()
    }

    fn internal_transition(&mut self, _time: SimTime) {}

    fn external_transition(&mut self, _time: SimTime, _elapsed: SimDuration, events: &[Event]) {
        for event in events {
            self.readings += 1;
            if let Some(watts) = event.payload().get("watts").and_then(serde_json::Value::as_f64) {
                self.last_watts = watts;
            }
        }
    }

    fn report(&self) -> serde_json::Value {
        json!({ "readings": self.readings, "last_watts": self.last_watts })
    }
}

pub fn air_conditioner(period: f64) -> BehaviorFactory {
    Arc::new(move || Box::new(AirConditioner::new(period)) as Box<dyn AtomicBehavior>)
}

pub fn energy_meter() -> BehaviorFactory {
    Arc::new(|| Box::new(EnergyMeter::default()) as Box<dyn AtomicBehavior>)
}

fn ac_descriptor(acceleration: Option<f64>) -> ModelDescriptor {
    let descriptor = ModelDescriptor::atomic("ac", "host-ac")
        .imports(["Command"])
        .exports(["PowerChanged"]);
    match acceleration {
        Some(acc) => descriptor.real_time(acc),
        None => descriptor,
    }
}

fn meter_descriptor(acceleration: Option<f64>) -> ModelDescriptor {
    let descriptor = ModelDescriptor::atomic("meter", "host-meter").imports(["PowerChanged"]);
    match acceleration {
        Some(acc) => descriptor.real_time(acc),
        None => descriptor,
    }
}

/// `house` on host-house, coupling `ac` to `meter`.
pub fn house() -> ArchitectureDescriptor {
    house_with(None)
}

/// The flat house, paced at `acceleration` in real-time runs.
pub fn real_time_house(acceleration: f64) -> ArchitectureDescriptor {
    house_with(Some(acceleration))
}

fn house_with(acceleration: Option<f64>) -> ArchitectureDescriptor {
    let mut root = ModelDescriptor::coupled("house", "host-house", ["ac", "meter"])
        .route_import("Command", "ac", "Command")
        .couple("ac", "PowerChanged", "meter", "PowerChanged");
    if let Some(acc) = acceleration {
        root = root.real_time(acc);
    }
    ArchitectureDescriptor::builder("house-arch", "house", TimeUnit::Hours)
        .model(root)
        .model(ac_descriptor(acceleration))
        .model(meter_descriptor(acceleration))
        .build()
        .unwrap()
}

/// `house` holding a `kitchen` coordinator around `ac`, plus `meter`.
pub fn nested_house() -> ArchitectureDescriptor {
    ArchitectureDescriptor::builder("nested-house-arch", "house", TimeUnit::Hours)
        .model(
            ModelDescriptor::coupled("house", "host-house", ["kitchen", "meter"])
                .couple("kitchen", "PowerChanged", "meter", "PowerChanged"),
        )
        .model(
            ModelDescriptor::coupled("kitchen", "host-kitchen", ["ac"])
                .reexport("PowerChanged", "ac", "PowerChanged"),
        )
        .model(ac_descriptor(None))
        .model(meter_descriptor(None))
        .build()
        .unwrap()
}

/// Every host of the house architectures, kept alive by the test.
pub struct Deployment {
    pub network: Arc<InProcessNetwork>,
    pub ac: Arc<Host>,
    pub meter: Arc<Host>,
    pub house: Arc<Host>,
    pub kitchen: Arc<Host>,
}

pub fn deploy(network_config: NetworkConfig, ac_period: f64) -> Deployment {
    let network = InProcessNetwork::new(network_config);
    let config = RealTimeConfig::default();
    let ac = Host::atomic(&network, "host-ac", "ac", air_conditioner(ac_period), config.clone()).unwrap();
    let meter = Host::atomic(&network, "host-meter", "meter", energy_meter(), config.clone()).unwrap();
    let house = Host::empty(&network, "host-house", config.clone()).unwrap();
    let kitchen = Host::empty(&network, "host-kitchen", config).unwrap();
    Deployment {
        network,
        ac,
        meter,
        house,
        kitchen,
    }
}

pub fn readings(summary: &serde_json::Value) -> u64 {
    summary["readings"].as_u64().unwrap_or_default()
}
