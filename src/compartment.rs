//! Compartment contract: deciding which flows are elementary.
//!
//! Compartment taxonomy management belongs to a collaborator; this crate only
//! needs a yes/no answer per flow. [`SnapshotCompartments`] provides a
//! name-based default covering the usual LCI databases.

use std::collections::{HashMap, HashSet};

use crate::entity::{FlowId, InventorySnapshot};

/// Compartment names treated as elementary by default (ecoinvent + USLCI).
pub const ELEMENTARY_COMPARTMENTS: [&str; 5] =
    ["air", "water", "soil", "natural resource", "resource"];

/// Lookup from flow id to elementary status.
pub trait CompartmentLookup {
    fn is_elementary(&self, flow: FlowId) -> bool;
}

/// Default lookup derived from the snapshot's own compartment names.
///
/// A flow is elementary when its (case-insensitive, trimmed) compartment is
/// one of [`ELEMENTARY_COMPARTMENTS`].
#[derive(Debug, Clone)]
pub struct SnapshotCompartments {
    elementary: HashSet<FlowId>,
}

impl SnapshotCompartments {
    pub fn from_snapshot(snapshot: &InventorySnapshot) -> Self {
        let elementary = snapshot
            .flows()
            .iter()
            .filter(|f| {
                let name = f.compartment.trim().to_ascii_lowercase();
                ELEMENTARY_COMPARTMENTS.contains(&name.as_str())
            })
            .map(|f| f.id)
            .collect();
        Self { elementary }
    }
}

impl CompartmentLookup for SnapshotCompartments {
    fn is_elementary(&self, flow: FlowId) -> bool {
        self.elementary.contains(&flow)
    }
}

/// Explicit per-flow override, for callers with their own taxonomy.
impl CompartmentLookup for HashMap<FlowId, bool> {
    fn is_elementary(&self, flow: FlowId) -> bool {
        self.get(&flow).copied().unwrap_or(false)
    }
}
