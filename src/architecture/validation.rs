//! Architecture validation.
//!
//! Builders and deserialization both funnel through `validate`, so an
//! `ArchitectureDescriptor` value always satisfies these rules:
//! - exactly one root, which is nobody's submodel;
//! - every other model is a submodel of exactly one coupled model and is
//!   reachable from the root;
//! - every route refers to a declared submodel and declared event types;
//! - acceleration factors are positive and identical across the run.

use std::collections::{BTreeMap, BTreeSet};

use crate::architecture::{ArchitectureDescriptor, ModelDescriptor, ModelRole};
use crate::error::PreconditionError;
use crate::uri::ModelUri;

/// Conservative upper bound on the number of models of one architecture.
pub const MAX_MODELS: usize = 4096;

fn invalid(reason: impl Into<String>) -> PreconditionError {
    PreconditionError::InvalidArchitecture { reason: reason.into() }
}

pub(crate) fn validate(arch: &ArchitectureDescriptor) -> Result<(), PreconditionError> {
    if arch.models.is_empty() {
        return Err(invalid("architecture describes no model"));
    }
    if arch.models.len() > MAX_MODELS {
        return Err(invalid(format!("architecture exceeds {MAX_MODELS} models")));
    }
    if arch.uri.as_str().trim().is_empty() {
        return Err(invalid("architecture URI is empty"));
    }
    if !arch.models.contains_key(&arch.root) {
        return Err(invalid(format!("root {} is not described", arch.root)));
    }

    for (uri, model) in &arch.models {
        if uri.as_str().trim().is_empty() {
            return Err(invalid("model URI is empty"));
        }
        if model.host.as_str().trim().is_empty() {
            return Err(invalid(format!("model {uri} has no host")));
        }
        match model.role {
            ModelRole::Atomic => validate_atomic(model)?,
            ModelRole::Coupled => validate_coupled(arch, model)?,
        }
    }

    validate_parents(arch)?;
    validate_reachability(arch)?;
    validate_acceleration(arch)
}

fn validate_atomic(model: &ModelDescriptor) -> Result<(), PreconditionError> {
    if !model.submodels.is_empty() {
        return Err(invalid(format!("atomic model {} declares submodels", model.uri)));
    }
    if !model.import_routes.is_empty() || !model.reexports.is_empty() || !model.couplings.is_empty() {
        return Err(invalid(format!("atomic model {} declares internal routing", model.uri)));
    }
    Ok(())
}

fn child<'a>(
    arch: &'a ArchitectureDescriptor,
    parent: &ModelDescriptor,
    uri: &ModelUri,
) -> Result<&'a ModelDescriptor, PreconditionError> {
    if !parent.submodels.contains(uri) {
        return Err(invalid(format!("{} routes events through {uri}, which is not one of its submodels", parent.uri)));
    }
    arch.models
        .get(uri)
        .ok_or_else(|| invalid(format!("submodel {uri} of {} is not described", parent.uri)))
}

fn validate_coupled(arch: &ArchitectureDescriptor, model: &ModelDescriptor) -> Result<(), PreconditionError> {
    if model.submodels.is_empty() {
        return Err(invalid(format!("coupled model {} has no submodel", model.uri)));
    }
    let distinct: BTreeSet<_> = model.submodels.iter().collect();
    if distinct.len() != model.submodels.len() {
        return Err(invalid(format!("coupled model {} lists a submodel twice", model.uri)));
    }
    if model.submodels.contains(&model.uri) {
        return Err(invalid(format!("coupled model {} contains itself", model.uri)));
    }
    for sub in &model.submodels {
        child(arch, model, sub)?;
    }

    for (event_type, routes) in &model.import_routes {
        if !model.imported.contains(event_type) {
            return Err(invalid(format!("{} routes undeclared import '{event_type}'", model.uri)));
        }
        for route in routes {
            let target = child(arch, model, &route.model)?;
            if !target.imported.contains(&route.event_type) {
                return Err(invalid(format!(
                    "{} does not import '{}' routed from {}",
                    route.model, route.event_type, model.uri
                )));
            }
        }
    }

    for (event_type, routes) in &model.reexports {
        if !model.exported.contains(event_type) {
            return Err(invalid(format!("{} re-exports undeclared '{event_type}'", model.uri)));
        }
        for route in routes {
            let source = child(arch, model, &route.model)?;
            if !source.exported.contains(&route.event_type) {
                return Err(invalid(format!(
                    "{} does not export '{}' re-exported by {}",
                    route.model, route.event_type, model.uri
                )));
            }
        }
    }

    for coupling in &model.couplings {
        let source = child(arch, model, &coupling.from.model)?;
        if !source.exported.contains(&coupling.from.event_type) {
            return Err(invalid(format!(
                "{} does not export coupled event '{}'",
                coupling.from.model, coupling.from.event_type
            )));
        }
        if coupling.to.is_empty() {
            return Err(invalid(format!("coupling from {} has no sink", coupling.from.model)));
        }
        for sink in &coupling.to {
            if sink.model == coupling.from.model {
                return Err(invalid(format!("{} is coupled to itself", sink.model)));
            }
            let target = child(arch, model, &sink.model)?;
            if !target.imported.contains(&sink.event_type) {
                return Err(invalid(format!(
                    "{} does not import coupled event '{}'",
                    sink.model, sink.event_type
                )));
            }
        }
    }
    Ok(())
}

fn validate_parents(arch: &ArchitectureDescriptor) -> Result<(), PreconditionError> {
    let mut parents: BTreeMap<&ModelUri, &ModelUri> = BTreeMap::new();
    for model in arch.models.values() {
        for sub in &model.submodels {
            if let Some(previous) = parents.insert(sub, &model.uri) {
                return Err(invalid(format!(
                    "{sub} is a submodel of both {previous} and {}",
                    model.uri
                )));
            }
        }
    }
    if let Some(parent) = parents.get(&arch.root) {
        return Err(invalid(format!("root {} is a submodel of {parent}", arch.root)));
    }
    for uri in arch.models.keys() {
        if uri != &arch.root && !parents.contains_key(uri) {
            return Err(invalid(format!("{uri} has no parent and is not the root")));
        }
    }
    Ok(())
}

fn validate_reachability(arch: &ArchitectureDescriptor) -> Result<(), PreconditionError> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![&arch.root];
    while let Some(uri) = stack.pop() {
        if !seen.insert(uri) {
            return Err(invalid(format!("{uri} is reached twice from the root")));
        }
        if let Some(model) = arch.models.get(uri) {
            stack.extend(model.submodels.iter());
        }
    }
    if seen.len() != arch.models.len() {
        return Err(invalid("some models are not reachable from the root"));
    }
    Ok(())
}

fn validate_acceleration(arch: &ArchitectureDescriptor) -> Result<(), PreconditionError> {
    let mut factor: Option<f64> = None;
    for model in arch.models.values() {
        let Some(acc) = model.acceleration else { continue };
        if !(acc.is_finite() && acc > 0.0) {
            return Err(invalid(format!("{} has a non-positive acceleration factor", model.uri)));
        }
        match factor {
            None => factor = Some(acc),
            Some(f) if (f - acc).abs() > f64::EPSILON * f.max(acc) => {
                return Err(invalid(format!(
                    "{} runs at acceleration {acc} while others run at {f}",
                    model.uri
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::architecture::{ArchitectureDescriptor, ModelDescriptor};
    use crate::time::TimeUnit;

    fn reason(result: crate::error::SimResult<ArchitectureDescriptor>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn rejects_missing_root() {
        let r = ArchitectureDescriptor::builder("a", "house", TimeUnit::Seconds)
            .model(ModelDescriptor::atomic("ac", "h"))
            .build();
        assert!(reason(r).contains("root house is not described"));
    }

    #[test]
    fn rejects_model_with_two_parents() {
        let r = ArchitectureDescriptor::builder("a", "house", TimeUnit::Seconds)
            .model(ModelDescriptor::coupled("house", "h0", ["kitchen", "ac"]))
            .model(ModelDescriptor::coupled("kitchen", "h1", ["ac"]))
            .model(ModelDescriptor::atomic("ac", "h2"))
            .build();
        assert!(reason(r).contains("submodel of both"));
    }

    #[test]
    fn rejects_orphan_model() {
        let r = ArchitectureDescriptor::builder("a", "house", TimeUnit::Seconds)
            .model(ModelDescriptor::coupled("house", "h0", ["ac"]))
            .model(ModelDescriptor::atomic("ac", "h1"))
            .model(ModelDescriptor::atomic("stray", "h2"))
            .build();
        assert!(reason(r).contains("stray has no parent"));
    }

    #[test]
    fn rejects_coupling_to_undeclared_import() {
        let r = ArchitectureDescriptor::builder("a", "house", TimeUnit::Seconds)
            .model(ModelDescriptor::coupled("house", "h0", ["ac", "meter"]).couple("ac", "On", "meter", "On"))
            .model(ModelDescriptor::atomic("ac", "h1").exports(["On"]))
            .model(ModelDescriptor::atomic("meter", "h2"))
            .build();
        assert!(reason(r).contains("meter does not import"));
    }

    #[test]
    fn rejects_route_through_foreign_model() {
        let r = ArchitectureDescriptor::builder("a", "house", TimeUnit::Seconds)
            .model(ModelDescriptor::coupled("house", "h0", ["ac"]).reexport("On", "meter", "On"))
            .model(ModelDescriptor::atomic("ac", "h1").exports(["On"]))
            .build();
        assert!(reason(r).contains("not one of its submodels"));
    }

    #[test]
    fn rejects_mixed_acceleration_factors() {
        let r = ArchitectureDescriptor::builder("a", "house", TimeUnit::Hours)
            .model(ModelDescriptor::coupled("house", "h0", ["ac"]).real_time(1800.0))
            .model(ModelDescriptor::atomic("ac", "h1").real_time(60.0))
            .build();
        assert!(reason(r).contains("acceleration"));
    }

    #[test]
    fn rejects_atomic_with_submodels() {
        let mut ac = ModelDescriptor::atomic("ac", "h1");
        ac.submodels.push("meter".into());
        let r = ArchitectureDescriptor::builder("a", "ac", TimeUnit::Seconds).model(ac).build();
        assert!(reason(r).contains("declares submodels"));
    }
}
