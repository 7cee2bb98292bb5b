//! Architecture descriptors.
//!
//! An architecture is the single source of truth used to bootstrap a run: it
//! maps every model URI of a simulation onto a role (atomic or coupled), the
//! host that holds it, its submodels and the routing of its events. It is
//! serializable so that it can travel from the supervisor to the root unit and
//! on to every coordinator unit, each of which receives the sub-architecture
//! rooted at its own model.
//!
//! Descriptors are validated when built or deserialized and cannot be changed
//! afterwards.

mod serialization;
mod validation;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{PreconditionError, SimResult};
use crate::event::EventType;
use crate::time::TimeUnit;
use crate::uri::{ArchitectureUri, HostAddress, ModelUri};

pub use serialization::{from_json, to_json_pretty};
pub use validation::MAX_MODELS;

/// Role of a model in the composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Atomic,
    Coupled,
}

/// An event type of a given submodel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventRoute {
    pub model: ModelUri,
    pub event_type: EventType,
}

impl EventRoute {
    /// Creates a route end.
    #[must_use]
    pub fn new(model: impl Into<ModelUri>, event_type: impl Into<EventType>) -> Self {
        Self {
            model: model.into(),
            event_type: event_type.into(),
        }
    }
}

/// Internal coupling: events exported by one submodel, imported by others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupling {
    pub from: EventRoute,
    pub to: Vec<EventRoute>,
}

/// Description of one model of the architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub uri: ModelUri,
    pub role: ModelRole,
    pub host: HostAddress,
    #[serde(default)]
    pub submodels: Vec<ModelUri>,
    #[serde(default)]
    pub imported: BTreeSet<EventType>,
    #[serde(default)]
    pub exported: BTreeSet<EventType>,
    /// Imported event type of this coupled model -> submodel event types receiving it.
    #[serde(default)]
    pub import_routes: BTreeMap<EventType, Vec<EventRoute>>,
    /// Exported event type of this coupled model -> submodel event types producing it.
    #[serde(default)]
    pub reexports: BTreeMap<EventType, Vec<EventRoute>>,
    #[serde(default)]
    pub couplings: Vec<Coupling>,
    /// Real-time acceleration factor, if the model takes part in real-time runs.
    #[serde(default)]
    pub acceleration: Option<f64>,
}

impl ModelDescriptor {
    /// Descriptor of an atomic model held by `host`.
    #[must_use]
    pub fn atomic(uri: impl Into<ModelUri>, host: impl Into<HostAddress>) -> Self {
        Self {
            uri: uri.into(),
            role: ModelRole::Atomic,
            host: host.into(),
            submodels: Vec::new(),
            imported: BTreeSet::new(),
            exported: BTreeSet::new(),
            import_routes: BTreeMap::new(),
            reexports: BTreeMap::new(),
            couplings: Vec::new(),
            acceleration: None,
        }
    }

    /// Descriptor of a coupled model held by `host`, made of `submodels`.
    #[must_use]
    pub fn coupled<I, U>(uri: impl Into<ModelUri>, host: impl Into<HostAddress>, submodels: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<ModelUri>,
    {
        Self {
            role: ModelRole::Coupled,
            submodels: submodels.into_iter().map(Into::into).collect(),
            ..Self::atomic(uri, host)
        }
    }

    /// Declares imported event types.
    #[must_use]
    pub fn imports<I, E>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventType>,
    {
        self.imported.extend(types.into_iter().map(Into::into));
        self
    }

    /// Declares exported event types.
    #[must_use]
    pub fn exports<I, E>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventType>,
    {
        self.exported.extend(types.into_iter().map(Into::into));
        self
    }

    /// Routes imported `event_type` of this coupled model to `child`'s `child_type`.
    #[must_use]
    pub fn route_import(
        mut self,
        event_type: impl Into<EventType>,
        child: impl Into<ModelUri>,
        child_type: impl Into<EventType>,
    ) -> Self {
        let event_type = event_type.into();
        self.imported.insert(event_type.clone());
        self.import_routes
            .entry(event_type)
            .or_default()
            .push(EventRoute::new(child, child_type));
        self
    }

    /// Re-exports `child`'s `child_type` as this coupled model's `event_type`.
    #[must_use]
    pub fn reexport(
        mut self,
        event_type: impl Into<EventType>,
        child: impl Into<ModelUri>,
        child_type: impl Into<EventType>,
    ) -> Self {
        let event_type = event_type.into();
        self.exported.insert(event_type.clone());
        self.reexports
            .entry(event_type)
            .or_default()
            .push(EventRoute::new(child, child_type));
        self
    }

    /// Couples `from`'s exported `from_type` to `to`'s imported `to_type`.
    #[must_use]
    pub fn couple(
        mut self,
        from: impl Into<ModelUri>,
        from_type: impl Into<EventType>,
        to: impl Into<ModelUri>,
        to_type: impl Into<EventType>,
    ) -> Self {
        let source = EventRoute::new(from, from_type);
        let sink = EventRoute::new(to, to_type);
        if let Some(existing) = self.couplings.iter_mut().find(|c| c.from == source) {
            existing.to.push(sink);
        } else {
            self.couplings.push(Coupling {
                from: source,
                to: vec![sink],
            });
        }
        self
    }

    /// Marks the model as taking part in real-time runs.
    #[must_use]
    pub fn real_time(mut self, acceleration: f64) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    /// Returns true for coupled models.
    #[must_use]
    pub fn is_coupled(&self) -> bool {
        self.role == ModelRole::Coupled
    }
}

/// Unvalidated shape of an architecture, as found on the wire.
#[derive(Serialize, Deserialize)]
struct RawArchitecture {
    uri: ArchitectureUri,
    root: ModelUri,
    #[serde(default)]
    time_unit: TimeUnit,
    models: Vec<ModelDescriptor>,
}

/// A complete, validated, immutable architecture.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureDescriptor {
    uri: ArchitectureUri,
    root: ModelUri,
    time_unit: TimeUnit,
    models: BTreeMap<ModelUri, ModelDescriptor>,
}

impl RawArchitecture {
    fn validated(self) -> Result<ArchitectureDescriptor, PreconditionError> {
        let mut models = BTreeMap::new();
        for model in self.models {
            let uri = model.uri.clone();
            if models.insert(uri.clone(), model).is_some() {
                return Err(PreconditionError::InvalidArchitecture {
                    reason: format!("model {uri} is described twice"),
                });
            }
        }
        let arch = ArchitectureDescriptor {
            uri: self.uri,
            root: self.root,
            time_unit: self.time_unit,
            models,
        };
        validation::validate(&arch)?;
        Ok(arch)
    }
}

impl Serialize for ArchitectureDescriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawArchitecture {
            uri: self.uri.clone(),
            root: self.root.clone(),
            time_unit: self.time_unit,
            models: self.models.values().cloned().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArchitectureDescriptor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawArchitecture::deserialize(deserializer)?
            .validated()
            .map_err(serde::de::Error::custom)
    }
}

impl ArchitectureDescriptor {
    /// Starts building an architecture rooted at `root`.
    #[must_use]
    pub fn builder(uri: impl Into<ArchitectureUri>, root: impl Into<ModelUri>, time_unit: TimeUnit) -> ArchitectureBuilder {
        ArchitectureBuilder {
            uri: uri.into(),
            root: root.into(),
            time_unit,
            models: Vec::new(),
        }
    }

    /// Identifier of the architecture.
    #[must_use]
    pub const fn uri(&self) -> &ArchitectureUri {
        &self.uri
    }

    /// URI of the root model.
    #[must_use]
    pub const fn root(&self) -> &ModelUri {
        &self.root
    }

    /// Unit of every simulated time of the run.
    #[must_use]
    pub const fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Descriptor of the root model.
    ///
    /// # Errors
    ///
    /// Never fails on a validated architecture; kept fallible for symmetry with `descriptor`.
    pub fn root_descriptor(&self) -> SimResult<&ModelDescriptor> {
        self.descriptor(&self.root)
    }

    /// Descriptor of `uri`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::UnknownModel` if `uri` is not part of the architecture.
    pub fn descriptor(&self, uri: &ModelUri) -> SimResult<&ModelDescriptor> {
        self.models
            .get(uri)
            .ok_or_else(|| PreconditionError::UnknownModel { uri: uri.clone() }.into())
    }

    /// Returns true if `uri` is part of the architecture.
    #[must_use]
    pub fn contains(&self, uri: &ModelUri) -> bool {
        self.models.contains_key(uri)
    }

    /// All model descriptors, ordered by URI.
    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    /// Number of models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Always false for a validated architecture.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// URI of the coupled model that lists `uri` as a submodel.
    #[must_use]
    pub fn parent_of(&self, uri: &ModelUri) -> Option<&ModelUri> {
        self.models
            .values()
            .find(|m| m.submodels.contains(uri))
            .map(|m| &m.uri)
    }

    /// Every model of the subtree rooted at `uri`, `uri` first, depth first.
    #[must_use]
    pub fn subtree(&self, uri: &ModelUri) -> Vec<&ModelDescriptor> {
        let mut out = Vec::new();
        let mut stack = vec![uri];
        while let Some(next) = stack.pop() {
            if let Some(desc) = self.models.get(next) {
                out.push(desc);
                stack.extend(desc.submodels.iter().rev());
            }
        }
        out
    }

    /// Atomic models of the subtree rooted at `uri`.
    #[must_use]
    pub fn atomic_models_under(&self, uri: &ModelUri) -> Vec<&ModelDescriptor> {
        self.subtree(uri)
            .into_iter()
            .filter(|m| m.role == ModelRole::Atomic)
            .collect()
    }

    /// Acceleration factor of `uri`: its own, else the nearest ancestor's.
    #[must_use]
    pub fn effective_acceleration(&self, uri: &ModelUri) -> Option<f64> {
        let mut current = Some(uri);
        while let Some(model) = current {
            if let Some(acc) = self.models.get(model).and_then(|m| m.acceleration) {
                return Some(acc);
            }
            current = self.parent_of(model);
        }
        None
    }

    /// Returns true if the root takes part in real-time runs.
    #[must_use]
    pub fn is_real_time(&self) -> bool {
        self.effective_acceleration(&self.root).is_some()
    }

    /// The architecture of the subtree rooted at `uri`.
    ///
    /// Inherited acceleration factors are made explicit so that the subtree
    /// keeps the real-time pacing of the whole run.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::UnknownModel` if `uri` is not part of the architecture.
    pub fn sub_architecture(&self, uri: &ModelUri) -> SimResult<Self> {
        if !self.contains(uri) {
            return Err(PreconditionError::UnknownModel { uri: uri.clone() }.into());
        }
        if uri == &self.root {
            return Ok(self.clone());
        }
        let models = self
            .subtree(uri)
            .into_iter()
            .map(|m| {
                let mut m = m.clone();
                m.acceleration = self.effective_acceleration(&m.uri);
                (m.uri.clone(), m)
            })
            .collect();
        Ok(Self {
            uri: self.uri.clone(),
            root: uri.clone(),
            time_unit: self.time_unit,
            models,
        })
    }
}

/// Collects model descriptors, then validates them into an architecture.
#[derive(Debug, Clone)]
pub struct ArchitectureBuilder {
    uri: ArchitectureUri,
    root: ModelUri,
    time_unit: TimeUnit,
    models: Vec<ModelDescriptor>,
}

impl ArchitectureBuilder {
    /// Adds a model descriptor.
    #[must_use]
    pub fn model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.push(descriptor);
        self
    }

    /// Validates the collected descriptors and marks the architecture complete.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::InvalidArchitecture` describing the first violated rule.
    pub fn build(self) -> SimResult<ArchitectureDescriptor> {
        let raw = RawArchitecture {
            uri: self.uri,
            root: self.root,
            time_unit: self.time_unit,
            models: self.models,
        };
        Ok(raw.validated()?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `house` (coupled) holding `ac` and `meter` (atomic), each on its own host.
    pub(crate) fn house() -> ArchitectureDescriptor {
        ArchitectureDescriptor::builder("house-arch", "house", TimeUnit::Hours)
            .model(
                ModelDescriptor::coupled("house", "host-house", ["ac", "meter"])
                    .couple("ac", "PowerChanged", "meter", "PowerChanged"),
            )
            .model(ModelDescriptor::atomic("ac", "host-ac").exports(["PowerChanged"]))
            .model(ModelDescriptor::atomic("meter", "host-meter").imports(["PowerChanged"]))
            .build()
            .unwrap()
    }

    #[test]
    fn every_non_root_model_has_exactly_one_parent() {
        let arch = house();
        assert_eq!(arch.parent_of(&ModelUri::new("house")), None);
        assert_eq!(arch.parent_of(&ModelUri::new("ac")), Some(&ModelUri::new("house")));
        assert_eq!(arch.parent_of(&ModelUri::new("meter")), Some(&ModelUri::new("house")));
        let roots: Vec<_> = arch.models().filter(|m| arch.parent_of(&m.uri).is_none()).collect();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn sub_architecture_is_rooted_at_the_child() {
        let arch = house();
        let sub = arch.sub_architecture(&ModelUri::new("ac")).unwrap();
        assert_eq!(sub.root(), &ModelUri::new("ac"));
        assert_eq!(sub.len(), 1);
        assert!(arch.sub_architecture(&ModelUri::new("fridge")).is_err());
    }

    #[test]
    fn sub_architecture_inherits_acceleration() {
        let arch = ArchitectureDescriptor::builder("rt", "house", TimeUnit::Hours)
            .model(ModelDescriptor::coupled("house", "host-house", ["ac"]).real_time(1800.0))
            .model(ModelDescriptor::atomic("ac", "host-ac"))
            .build()
            .unwrap();
        assert!(arch.is_real_time());
        let sub = arch.sub_architecture(&ModelUri::new("ac")).unwrap();
        assert_eq!(sub.root_descriptor().unwrap().acceleration, Some(1800.0));
    }

    #[test]
    fn coupling_builder_merges_sinks_of_one_source() {
        let desc = ModelDescriptor::coupled("house", "h", ["ac", "meter", "logger"])
            .couple("ac", "PowerChanged", "meter", "PowerChanged")
            .couple("ac", "PowerChanged", "logger", "Log");
        assert_eq!(desc.couplings.len(), 1);
        assert_eq!(desc.couplings[0].to.len(), 2);
    }

    #[test]
    fn atomic_models_under_walks_nested_coupled_models() {
        let arch = ArchitectureDescriptor::builder("nested", "house", TimeUnit::Seconds)
            .model(ModelDescriptor::coupled("house", "h0", ["kitchen", "meter"]))
            .model(ModelDescriptor::coupled("kitchen", "h1", ["fridge", "oven"]))
            .model(ModelDescriptor::atomic("fridge", "h2"))
            .model(ModelDescriptor::atomic("oven", "h3"))
            .model(ModelDescriptor::atomic("meter", "h4"))
            .build()
            .unwrap();
        let atomics: Vec<_> = arch
            .atomic_models_under(&ModelUri::new("house"))
            .into_iter()
            .map(|m| m.uri.as_str().to_string())
            .collect();
        assert_eq!(atomics, vec!["fridge", "oven", "meter"]);
    }
}
