//! Deterministic spec ordering.
//!
//! Context-only specs come first (alphabetical by file name), then the rest in
//! dependency order. Among specs whose dependencies are all placed, the
//! alphabetically first file name goes next.

use std::collections::{BTreeSet, HashMap};

use super::SpecRecord;
use crate::errors::OrderError;

/// Order specs for execution.
///
/// Dependencies must name specs in the same set. A context-only dependency is
/// already satisfied since context specs are placed first.
pub fn order_specs(specs: Vec<SpecRecord>) -> Result<Vec<SpecRecord>, OrderError> {
    let mut ids: HashMap<&str, usize> = HashMap::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        if ids.insert(spec.meta.id.as_str(), i).is_some() {
            return Err(OrderError::DuplicateId {
                id: spec.meta.id.clone(),
            });
        }
    }

    let mut in_degree = vec![0usize; specs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];

    for (i, spec) in specs.iter().enumerate() {
        for dep in &spec.meta.depends_on {
            let &from = ids
                .get(dep.as_str())
                .ok_or_else(|| OrderError::UnknownDependency {
                    spec: spec.meta.id.clone(),
                    dependency: dep.clone(),
                })?;
            if specs[from].context_only || spec.context_only {
                continue;
            }
            in_degree[i] += 1;
            dependents[from].push(i);
        }
    }

    let mut context: Vec<usize> = (0..specs.len()).filter(|&i| specs[i].context_only).collect();
    context.sort_by(|&a, &b| specs[a].file.cmp(&specs[b].file));

    // Ready queue keyed by (file name, index) for alphabetical tie-breaking
    let mut ready: BTreeSet<(&str, usize)> = (0..specs.len())
        .filter(|&i| !specs[i].context_only && in_degree[i] == 0)
        .map(|i| (specs[i].file.as_str(), i))
        .collect();

    let mut order = context;
    while let Some(next) = ready.pop_first() {
        let (_, idx) = next;
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert((specs[dependent].file.as_str(), dependent));
            }
        }
    }

    if order.len() != specs.len() {
        let mut stuck: Vec<String> = (0..specs.len())
            .filter(|&i| !specs[i].context_only && in_degree[i] > 0)
            .map(|i| specs[i].meta.id.clone())
            .collect();
        stuck.sort();
        return Err(OrderError::Cycle { ids: stuck });
    }

    let mut slots: Vec<Option<SpecRecord>> = specs.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}
