use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(Uuid);

/// Stable identifier of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FlowId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Uuid> for ProcessId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange direction, seen from the owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// A material or energy flow. Immutable once loaded; classified exactly once
/// per build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    /// Compartment name, e.g. "air" or "technosphere". Interpreted through a
    /// [`CompartmentLookup`](crate::compartment::CompartmentLookup).
    pub compartment: String,
    /// Reference unit, e.g. "kg".
    pub unit: String,
}

impl Flow {
    pub fn new(name: impl Into<String>, compartment: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: FlowId::new(),
            name: name.into(),
            compartment: compartment.into(),
            unit: unit.into(),
        }
    }
}

/// A single exchange owned by a process. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub flow: FlowId,
    pub direction: Direction,
    pub amount: f64,
    /// Marks a designated reference exchange of the owning process.
    pub is_reference: bool,
    /// Explicit producer link, populated only when the source data supplies
    /// one (ecospold-style partner links). Absence triggers the ambiguous
    /// producer path instead of format-specific branching.
    pub producer_link: Option<ProcessId>,
}

impl Exchange {
    pub fn input(flow: FlowId, amount: f64) -> Self {
        Self::new(flow, Direction::Input, amount)
    }

    pub fn output(flow: FlowId, amount: f64) -> Self {
        Self::new(flow, Direction::Output, amount)
    }

    fn new(flow: FlowId, direction: Direction, amount: f64) -> Self {
        Self {
            flow,
            direction,
            amount,
            is_reference: false,
            producer_link: None,
        }
    }

    /// Flag this exchange as a reference exchange.
    pub fn reference(mut self) -> Self {
        self.is_reference = true;
        self
    }

    /// Attach an explicit producer link.
    pub fn linked_to(mut self, producer: ProcessId) -> Self {
        self.producer_link = Some(producer);
        self
    }

    /// Exchange amount under the positive-output sign convention.
    pub(crate) fn signed_amount(&self) -> f64 {
        match self.direction {
            Direction::Output => self.amount,
            Direction::Input => -self.amount,
        }
    }
}

/// A process with its ordered exchange list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub exchanges: Vec<Exchange>,
    /// Marks a market-like aggregator, usable as a deterministic fallback
    /// when several commodities produce the same flow.
    pub is_market: bool,
}

impl Process {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProcessId::new(),
            name: name.into(),
            exchanges: Vec::new(),
            is_market: false,
        }
    }

    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    pub fn market(mut self) -> Self {
        self.is_market = true;
        self
    }

    /// Indices of the declared reference exchanges, in exchange order.
    pub(crate) fn reference_indices(&self) -> Vec<usize> {
        self.exchanges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_reference)
            .map(|(i, _)| i)
            .collect()
    }
}

/// An immutable snapshot of the database: the input contract of this crate.
///
/// Upstream collaborators (archive, catalog, format parsers) assemble this;
/// every derived entity is rebuilt from scratch on each build, so the
/// snapshot can be reused across builds unchanged.
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    flows: Vec<Flow>,
    processes: Vec<Process>,
    flow_index: HashMap<FlowId, usize>,
    process_index: HashMap<ProcessId, usize>,
}

impl InventorySnapshot {
    pub fn new(flows: Vec<Flow>, processes: Vec<Process>) -> Self {
        let flow_index = flows.iter().enumerate().map(|(i, f)| (f.id, i)).collect();
        let process_index = processes.iter().enumerate().map(|(i, p)| (p.id, i)).collect();
        Self {
            flows,
            processes,
            flow_index,
            process_index,
        }
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flow_index.get(&id).map(|&i| &self.flows[i])
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.process_index.get(&id).map(|&i| &self.processes[i])
    }
}
