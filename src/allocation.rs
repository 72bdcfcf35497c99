//! Allocation of multi-output processes.
//!
//! A process whose reference set intersects the interior flows more than once
//! needs a policy before it can contribute well-defined columns. The default
//! surplus policy keeps the matrix square and invertible without a normative
//! split: the first-registered reference keeps the full column and every
//! other co-product is pushed out to the exterior matrix as a recorded
//! surplus, flipping the database-wide `fully_allocated` indicator.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::entity::{FlowId, InventorySnapshot, ProcessId};
use crate::error::Diagnostic;
use crate::registry::CommodityRegistry;

const FRACTION_SUM_TOLERANCE: f64 = 1e-9;

/// How multi-reference processes are split into columns.
#[derive(Debug, Clone, Default)]
pub enum AllocationPolicy {
    /// Keep the first-registered reference as the sole column; record every
    /// other interior reference as a surplus co-product.
    #[default]
    Surplus,
    /// Merge declared co-products into an existing single-output producer of
    /// the same flow, keyed by (process, co-product flow). Never inferred.
    Substitution(HashMap<(ProcessId, FlowId), ProcessId>),
    /// Caller-supplied fractions per (process, flow); each in (0, 1], summing
    /// to 1 over the interior references of the process.
    Explicit(HashMap<(ProcessId, FlowId), f64>),
}

/// Unallocated secondary reference output, recorded outside the interior
/// matrix. Its presence implies `fully_allocated == false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurplusCoproduct {
    pub process: ProcessId,
    pub flow: FlowId,
    /// Raw output level under the positive-output sign convention.
    pub amount: f64,
}

/// Resolved column plan consumed by the matrix builder.
#[derive(Debug, Clone, Default)]
pub struct AllocationPlan {
    fractions: HashMap<usize, f64>,
    primary: HashMap<ProcessId, usize>,
    surplus: Vec<SurplusCoproduct>,
    surplus_keys: HashSet<(ProcessId, FlowId)>,
    substitutions: HashMap<(ProcessId, FlowId), usize>,
    excluded: HashSet<ProcessId>,
}

impl AllocationPlan {
    /// Whether the commodity receives a column in the interior matrix.
    pub fn is_active(&self, commodity: usize) -> bool {
        self.fractions.contains_key(&commodity)
    }

    /// Allocation fraction of an active commodity.
    pub fn fraction(&self, commodity: usize) -> Option<f64> {
        self.fractions.get(&commodity).copied()
    }

    pub fn is_surplus(&self, process: ProcessId, flow: FlowId) -> bool {
        self.surplus_keys.contains(&(process, flow))
    }

    /// Target commodity a declared co-product is merged into.
    pub fn substitution_target(&self, process: ProcessId, flow: FlowId) -> Option<usize> {
        self.substitutions.get(&(process, flow)).copied()
    }

    pub fn is_excluded(&self, process: ProcessId) -> bool {
        self.excluded.contains(&process)
    }

    pub fn surplus(&self) -> &[SurplusCoproduct] {
        &self.surplus
    }

    /// True when no surplus co-product was recorded.
    pub fn fully_allocated(&self) -> bool {
        self.surplus.is_empty()
    }

    /// Active commodity indices, ascending.
    pub fn active_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.fractions.keys().copied().collect();
        indices.sort_unstable();
        indices
    }
}

#[cfg(test)]
impl AllocationPlan {
    pub(crate) fn activate(&mut self, process: ProcessId, commodity: usize, fraction: f64) {
        activate(self, process, commodity, fraction);
    }

    pub(crate) fn link_substitution(&mut self, process: ProcessId, flow: FlowId, target: usize) {
        self.substitutions.insert((process, flow), target);
    }
}

/// Applies the configured allocation policy process by process.
pub struct AllocationResolver;

impl AllocationResolver {
    pub fn resolve(
        snapshot: &InventorySnapshot,
        registry: &CommodityRegistry,
        policy: &AllocationPolicy,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> AllocationPlan {
        let mut plan = AllocationPlan::default();

        for process in snapshot.processes() {
            let commodities = registry.of_process(process.id);
            if commodities.is_empty() {
                continue;
            }
            let interior: Vec<usize> = commodities
                .iter()
                .copied()
                .filter(|&c| registry.get(c).is_interior)
                .collect();

            match interior.len() {
                // Terminal process: its first reference still needs a column
                // so downstream ordering can represent it.
                0 => activate(&mut plan, process.id, commodities[0], 1.0),
                1 => activate(&mut plan, process.id, interior[0], 1.0),
                _ => match policy {
                    AllocationPolicy::Surplus => {
                        apply_surplus(&mut plan, registry, process.id, &interior);
                    }
                    AllocationPolicy::Explicit(fractions) => {
                        apply_explicit(&mut plan, registry, process.id, &interior, fractions, diagnostics);
                    }
                    AllocationPolicy::Substitution(map) => {
                        apply_substitution(&mut plan, registry, process.id, &interior, map, diagnostics);
                    }
                },
            }
        }

        plan
    }
}

fn activate(plan: &mut AllocationPlan, process: ProcessId, commodity: usize, fraction: f64) {
    plan.fractions.insert(commodity, fraction);
    plan.primary.entry(process).or_insert(commodity);
}

fn record_surplus(plan: &mut AllocationPlan, registry: &CommodityRegistry, commodity: usize) {
    let c = registry.get(commodity);
    debug!(process = %c.process, flow = %c.flow, "surplus co-product");
    plan.surplus.push(SurplusCoproduct {
        process: c.process,
        flow: c.flow,
        amount: c.reference_amount,
    });
    plan.surplus_keys.insert((c.process, c.flow));
}

fn apply_surplus(
    plan: &mut AllocationPlan,
    registry: &CommodityRegistry,
    process: ProcessId,
    interior: &[usize],
) {
    activate(plan, process, interior[0], 1.0);
    for &secondary in &interior[1..] {
        record_surplus(plan, registry, secondary);
    }
}

fn apply_explicit(
    plan: &mut AllocationPlan,
    registry: &CommodityRegistry,
    process: ProcessId,
    interior: &[usize],
    fractions: &HashMap<(ProcessId, FlowId), f64>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut resolved = Vec::with_capacity(interior.len());
    let mut sum = 0.0;
    for &commodity in interior {
        let flow = registry.get(commodity).flow;
        match fractions.get(&(process, flow)) {
            Some(&alpha) if alpha > 0.0 && alpha <= 1.0 => {
                resolved.push((commodity, alpha));
                sum += alpha;
            }
            Some(&alpha) => {
                return exclude(
                    plan,
                    process,
                    diagnostics,
                    format!("allocation fraction {alpha} for flow {flow} outside (0, 1]"),
                );
            }
            None => {
                return exclude(
                    plan,
                    process,
                    diagnostics,
                    format!("missing allocation fraction for flow {flow}"),
                );
            }
        }
    }
    if (sum - 1.0).abs() > FRACTION_SUM_TOLERANCE {
        return exclude(
            plan,
            process,
            diagnostics,
            format!("allocation fractions sum to {sum}, expected 1"),
        );
    }
    for (commodity, alpha) in resolved {
        activate(plan, process, commodity, alpha);
    }
}

fn apply_substitution(
    plan: &mut AllocationPlan,
    registry: &CommodityRegistry,
    process: ProcessId,
    interior: &[usize],
    map: &HashMap<(ProcessId, FlowId), ProcessId>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut remaining = Vec::new();
    let mut links = Vec::new();
    for &commodity in interior {
        let flow = registry.get(commodity).flow;
        let Some(&target_process) = map.get(&(process, flow)) else {
            remaining.push(commodity);
            continue;
        };
        let target = registry.lookup(target_process, flow).filter(|&t| {
            let single_output = registry
                .of_process(target_process)
                .iter()
                .filter(|&&c| registry.get(c).is_interior)
                .count()
                == 1;
            registry.get(t).is_interior && single_output
        });
        match target {
            Some(t) => links.push(((process, flow), t)),
            None => {
                return substitution_failure(
                    plan,
                    process,
                    diagnostics,
                    format!(
                        "substitute {target_process} is not a single-output producer of {flow}"
                    ),
                );
            }
        }
    }
    if remaining.is_empty() {
        return substitution_failure(
            plan,
            process,
            diagnostics,
            "every reference flow is substituted away".to_string(),
        );
    }

    activate(plan, process, remaining[0], 1.0);
    for &secondary in &remaining[1..] {
        record_surplus(plan, registry, secondary);
    }
    for (key, target) in links {
        plan.substitutions.insert(key, target);
    }
}

fn exclude(
    plan: &mut AllocationPlan,
    process: ProcessId,
    diagnostics: &mut Vec<Diagnostic>,
    reason: String,
) {
    warn!(process = %process, reason, "allocation failed; process excluded from interior matrix");
    diagnostics.push(Diagnostic::AllocationError { process, reason });
    plan.excluded.insert(process);
}

fn substitution_failure(
    plan: &mut AllocationPlan,
    process: ProcessId,
    diagnostics: &mut Vec<Diagnostic>,
    reason: String,
) {
    warn!(process = %process, reason, "substitution failed; process excluded from interior matrix");
    diagnostics.push(Diagnostic::SubstitutionError { process, reason });
    plan.excluded.insert(process);
}
