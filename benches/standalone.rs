use std::collections::BTreeSet;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use distdevs::config::{NetworkConfig, RealTimeConfig, SupervisorConfig};
use distdevs::model::{AtomicBehavior, BehaviorFactory};
use distdevs::{
    ArchitectureDescriptor, Emission, Event, EventType, Host, InProcessNetwork, ModelDescriptor, SimDuration,
    SimTime, Supervisor, TimeUnit,
};

/// Emits a pulse every hour.
struct Pulse;

impl AtomicBehavior for Pulse {
    fn imported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::new()
    }
    fn exported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::new("Pulse")])
    }
    fn initialise_state(&mut self, _start: SimTime) {}
    fn time_advance(&self) -> SimDuration {
        SimDuration::new(1.0)
    }
    fn output(&self, time: SimTime) -> Vec<Emission> {
        vec![Emission::new("Pulse", serde_json::json!(time.value()))]
    }
    fn internal_transition(&mut self, _time: SimTime) {}
    fn external_transition(&mut self, _time: SimTime, _elapsed: SimDuration, _events: &[Event]) {}
}

/// Counts the pulses it receives.
#[derive(Default)]
struct Counter {
    seen: u64,
}

impl AtomicBehavior for Counter {
    fn imported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::new("Pulse")])
    }
    fn exported_event_types(&self) -> BTreeSet<EventType> {
        BTreeSet::new()
    }
    fn initialise_state(&mut self, _start: SimTime) {
        self.seen = 0;
    }
    fn time_advance(&self) -> SimDuration {
        SimDuration::INFINITY
    }
    fn output(&self, _time: SimTime) -> Vec<Emission> {
        Vec::new()
    }
    fn internal_transition(&mut self, _time: SimTime) {}
    fn external_transition(&mut self, _time: SimTime, _elapsed: SimDuration, events: &[Event]) {
        self.seen += events.len() as u64;
    }
    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "seen": self.seen })
    }
}

struct Bench {
    _hosts: Vec<Arc<Host>>,
    supervisor: Supervisor,
}

/// One pulse source coupled to `sinks` counters, each on its own host.
fn fan_out(sinks: usize) -> ArchitectureDescriptor {
    let counters: Vec<String> = (0..sinks).map(|i| format!("counter-{i}")).collect();
    let mut submodels = vec!["pulse".to_string()];
    submodels.extend(counters.iter().cloned());

    let mut root = ModelDescriptor::coupled("plant", "host-plant", submodels);
    for counter in &counters {
        root = root.couple("pulse", "Pulse", counter.as_str(), "Pulse");
    }
    let mut builder = ArchitectureDescriptor::builder("fan-out", "plant", TimeUnit::Hours)
        .model(root)
        .model(ModelDescriptor::atomic("pulse", "host-pulse").exports(["Pulse"]));
    for counter in &counters {
        builder = builder.model(ModelDescriptor::atomic(counter.as_str(), format!("host-{counter}")).imports(["Pulse"]));
    }
    builder.build().expect("valid fan-out architecture")
}

fn deploy(sinks: usize, encode_messages: bool) -> Bench {
    let network = InProcessNetwork::new(NetworkConfig { encode_messages });
    let config = RealTimeConfig::default();
    let pulse: BehaviorFactory = Arc::new(|| Box::new(Pulse) as Box<dyn AtomicBehavior>);
    let counter: BehaviorFactory = Arc::new(|| Box::new(Counter::default()) as Box<dyn AtomicBehavior>);

    let mut hosts = vec![
        Host::empty(&network, "host-plant", config.clone()).unwrap(),
        Host::atomic(&network, "host-pulse", "pulse", pulse, config.clone()).unwrap(),
    ];
    for i in 0..sinks {
        let uri = format!("counter-{i}");
        hosts.push(Host::atomic(&network, format!("host-{uri}"), uri, Arc::clone(&counter), config.clone()).unwrap());
    }
    let supervisor = Supervisor::new(&network, "control", SupervisorConfig::default()).unwrap();
    supervisor.construct_simulator(fan_out(sinks)).unwrap();
    Bench {
        _hosts: hosts,
        supervisor,
    }
}

fn bench_standalone_day(c: &mut Criterion) {
    let mut group = c.benchmark_group("standalone_day");
    group.throughput(Throughput::Elements(24));
    for sinks in [1_usize, 8] {
        for encode in [false, true] {
            let bench = deploy(sinks, encode);
            let label = if encode { "json" } else { "direct" };
            group.bench_with_input(BenchmarkId::new(label, sinks), &bench, |b, bench| {
                b.iter(|| {
                    bench
                        .supervisor
                        .do_standalone_simulation(SimTime::ZERO, SimDuration::new(24.0))
                        .unwrap()
                });
            });
        }
    }
    group.finish();
}

fn bench_construct_teardown(c: &mut Criterion) {
    let bench = deploy(8, false);
    let architecture = fan_out(8);
    bench.supervisor.reinitialise().unwrap();
    c.bench_function("construct_teardown/fan_out_8", |b| {
        b.iter(|| {
            bench.supervisor.construct_simulator(architecture.clone()).unwrap();
            bench.supervisor.reinitialise().unwrap();
        });
    });
}

criterion_group!(standalone, bench_standalone_day, bench_construct_teardown);
criterion_main!(standalone);
