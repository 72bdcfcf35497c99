//! Commodity registration: unique (process, flow) pairs forming the matrix
//! basis, plus the centrally owned producer adjacency index.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::classify::Classification;
use crate::entity::{Direction, FlowId, InventorySnapshot, Process, ProcessId};
use crate::error::Diagnostic;

/// A (process, flow) pair: the atomic row/column unit of the technology
/// matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Commodity {
    /// Registration index, stable for a given snapshot and configuration.
    pub index: usize,
    pub process: ProcessId,
    pub flow: FlowId,
    /// Reference amount under the positive-output convention: a reference
    /// input (waste treatment style) carries a negative amount.
    pub reference_amount: f64,
    /// Whether the flow was classified interior. Non-interior references are
    /// registered anyway; only co-product occurrences of them are pushed out
    /// to the exterior matrix.
    pub is_interior: bool,
    /// Position of the defining exchange within the owning process.
    pub(crate) exchange_idx: usize,
}

/// All commodities of a snapshot plus lookup and producer indices.
///
/// The producer index (flow -> producing commodity indices) is built once
/// here and treated as read-only downstream, instead of letting flows
/// register their own producers.
#[derive(Debug, Clone)]
pub struct CommodityRegistry {
    commodities: Vec<Commodity>,
    by_key: HashMap<(ProcessId, FlowId), usize>,
    by_process: HashMap<ProcessId, Vec<usize>>,
    producers: HashMap<FlowId, Vec<usize>>,
}

impl CommodityRegistry {
    /// Register commodities for every process in snapshot order.
    ///
    /// The reference set R(p) is the declared reference exchanges; when a
    /// process declares none and `reference_fallback` is on, R(p) falls back
    /// to the process outputs intersected with the interior flows. A process
    /// with an empty R(p) yields zero commodities and simply stays
    /// unrepresented in the matrix.
    pub fn build(
        snapshot: &InventorySnapshot,
        classification: &Classification,
        reference_fallback: bool,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Self {
        let mut registry = Self {
            commodities: Vec::new(),
            by_key: HashMap::new(),
            by_process: HashMap::new(),
            producers: HashMap::new(),
        };

        for process in snapshot.processes() {
            for idx in reference_set(process, classification, reference_fallback) {
                registry.register(process, idx, classification, diagnostics);
            }
        }

        registry
    }

    fn register(
        &mut self,
        process: &Process,
        exchange_idx: usize,
        classification: &Classification,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let exchange = &process.exchanges[exchange_idx];
        let key = (process.id, exchange.flow);
        if self.by_key.contains_key(&key) {
            warn!(process = %process.id, flow = %exchange.flow, "duplicate reference exchange");
            diagnostics.push(Diagnostic::DuplicateReference {
                process: process.id,
                flow: exchange.flow,
            });
            return;
        }

        let index = self.commodities.len();
        let is_interior = classification.is_interior(exchange.flow);
        self.commodities.push(Commodity {
            index,
            process: process.id,
            flow: exchange.flow,
            reference_amount: exchange.signed_amount(),
            is_interior,
            exchange_idx,
        });
        self.by_key.insert(key, index);
        self.by_process.entry(process.id).or_default().push(index);
        if is_interior {
            self.producers.entry(exchange.flow).or_default().push(index);
        }
    }

    pub fn commodities(&self) -> &[Commodity] {
        &self.commodities
    }

    pub fn get(&self, index: usize) -> &Commodity {
        &self.commodities[index]
    }

    pub fn lookup(&self, process: ProcessId, flow: FlowId) -> Option<usize> {
        self.by_key.get(&(process, flow)).copied()
    }

    /// Registered commodities of one process, in registration order.
    pub fn of_process(&self, process: ProcessId) -> &[usize] {
        self.by_process.get(&process).map_or(&[], Vec::as_slice)
    }

    /// Interior commodities producing the given flow, in registration order.
    pub fn producers_of(&self, flow: FlowId) -> &[usize] {
        self.producers.get(&flow).map_or(&[], Vec::as_slice)
    }
}

/// Exchange indices forming R(p), in exchange order.
fn reference_set(
    process: &Process,
    classification: &Classification,
    reference_fallback: bool,
) -> Vec<usize> {
    let declared = process.reference_indices();
    if !declared.is_empty() || !reference_fallback {
        return declared;
    }
    process
        .exchanges
        .iter()
        .enumerate()
        .filter(|(_, e)| e.direction == Direction::Output && classification.is_interior(e.flow))
        .map(|(i, _)| i)
        .collect()
}
