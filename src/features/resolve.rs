//! The stage scheduler: turns an enabled-feature set into a cycle-checked
//! total order of stage functions.
//!
//! Ordering is an explicit graph problem, not a comparator sort: every
//! declared edge is materialized and Kahn's algorithm visits them all, so
//! inconsistent constraint sets always surface as
//! [`SrpError::CircularDependency`] instead of slipping through whichever
//! pairs a sort routine happened to compare. Ties between unconstrained
//! functions are broken by registration order, making resolution
//! deterministic for identical inputs.

use std::collections::BTreeSet;

use crate::error::SrpError;

use super::{Feature, FeatureRegistry, Stage, StageFunc};

/// Resolve the execution order for `stage` given the enabled features.
///
/// Features referenced by non-optional pre/post constraints are pulled into
/// the set recursively even when not enabled themselves; a non-optional
/// reference to a feature that isn't registered, or that contributes
/// nothing to this stage, fails with [`SrpError::UnknownFeature`].
/// `?`-prefixed references never pull a feature in: they are dropped when
/// the target is absent and behave as normal constraints when present.
pub fn resolve<'r>(
    registry: &'r FeatureRegistry,
    stage: Stage,
    enabled: &[String],
) -> Result<Vec<&'r StageFunc>, SrpError> {
    resolve_with(registry, enabled, |f| f.stage(stage))
}

/// Resolve the execution order for the named action sub-stage.
pub fn resolve_action<'r>(
    registry: &'r FeatureRegistry,
    action: &str,
    enabled: &[String],
) -> Result<Vec<&'r StageFunc>, SrpError> {
    resolve_with(registry, enabled, |f| f.get_action(action))
}

fn resolve_with<'r>(
    registry: &'r FeatureRegistry,
    enabled: &[String],
    lookup: impl Fn(&'r Feature) -> Option<&'r StageFunc>,
) -> Result<Vec<&'r StageFunc>, SrpError> {
    // Phase 1: collect the participating features. Enabled features that
    // don't contribute to this stage are simply absent; enabled names that
    // aren't registered at all are errors.
    let mut selected: Vec<&'r str> = Vec::new();
    let mut work: Vec<&str> = Vec::new();

    for name in enabled {
        let feature = registry
            .get(name)
            .ok_or_else(|| SrpError::UnknownFeature(name.clone()))?;
        if lookup(feature).is_some() {
            work.push(feature.name);
        }
    }

    while let Some(name) = work.pop() {
        if selected.contains(&name) {
            continue;
        }
        let feature = registry
            .get(name)
            .ok_or_else(|| SrpError::UnknownFeature(name.to_string()))?;
        let func = lookup(feature)
            .ok_or_else(|| SrpError::UnknownFeature(name.to_string()))?;
        selected.push(feature.name);

        for req in func.pre_reqs.iter().chain(func.post_reqs.iter()) {
            if req.starts_with('?') {
                // Optional: honored later if present, never pulled in.
                continue;
            }
            let target = registry
                .get(req)
                .ok_or_else(|| SrpError::UnknownFeature(req.to_string()))?;
            if lookup(target).is_none() {
                return Err(SrpError::UnknownFeature(req.to_string()));
            }
            work.push(target.name);
        }
    }

    // Nodes in registration order; this is both the tie-break key and what
    // makes resolution deterministic.
    selected.sort_by_key(|name| registry.registration_index(name));
    let node_of = |name: &str| selected.iter().position(|n| *n == name);

    // Phase 2: materialize every declared edge. Edge a -> b means "a runs
    // before b". Optional constraints participate only when the referenced
    // feature made it into the set.
    let n = selected.len();
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree: Vec<usize> = vec![0; n];
    let mut add_edge = |succs: &mut Vec<Vec<usize>>, indegree: &mut Vec<usize>, a: usize, b: usize| {
        if !succs[a].contains(&b) {
            succs[a].push(b);
            indegree[b] += 1;
        }
    };

    for (b, name) in selected.iter().enumerate() {
        let func = lookup(registry.get(name).unwrap()).unwrap();
        for req in func.pre_reqs {
            let req = req.strip_prefix('?').unwrap_or(req);
            if let Some(a) = node_of(req) {
                add_edge(&mut succs, &mut indegree, a, b);
            }
        }
        for req in func.post_reqs {
            let req = req.strip_prefix('?').unwrap_or(req);
            if let Some(a) = node_of(req) {
                add_edge(&mut succs, &mut indegree, b, a);
            }
        }
    }

    // Phase 3: Kahn's algorithm. Ready set is ordered by node index, i.e.
    // registration order.
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order: Vec<&'r StageFunc> = Vec::with_capacity(n);
    let mut emitted = vec![false; n];

    while let Some(&i) = ready.iter().next() {
        ready.remove(&i);
        emitted[i] = true;
        order.push(lookup(registry.get(selected[i]).unwrap()).unwrap());
        for &next in &succs[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != n {
        let mut names: Vec<String> = selected
            .iter()
            .enumerate()
            .filter(|(i, _)| !emitted[*i])
            .map(|(_, name)| name.to_string())
            .collect();
        names.sort();
        return Err(SrpError::CircularDependency { names });
    }

    Ok(order)
}
