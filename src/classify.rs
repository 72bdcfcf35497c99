//! Flow classification: one pass over every exchange in the snapshot.
//!
//! A flow is *interior* when the database both consumes and produces it, so
//! it can become a dependency edge in the technology matrix. Elementary flows
//! are sources/sinks by definition and stay exterior no matter how often they
//! appear on either side.

use std::collections::HashMap;

use serde::Serialize;

use crate::compartment::CompartmentLookup;
use crate::entity::{Direction, FlowId, InventorySnapshot};
use crate::error::LciError;

/// Outcome of classification, disjoint per flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowClass {
    /// Consumed and produced in-database; candidate matrix dependency.
    Interior,
    /// Exterior, consumed only.
    Cutoff,
    /// Exterior, produced only (and not elementary).
    ReferenceProduct,
    /// Elementary compartment; always exterior.
    Emission,
}

/// Per-side occurrence tally for one flow.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    input: bool,
    output: bool,
    non_reference: bool,
}

/// Flow classification for one snapshot. Holds no other state; rebuilt on
/// every build.
#[derive(Debug, Clone)]
pub struct Classification {
    classes: HashMap<FlowId, FlowClass>,
}

impl Classification {
    pub fn class(&self, flow: FlowId) -> Option<FlowClass> {
        self.classes.get(&flow).copied()
    }

    pub fn is_interior(&self, flow: FlowId) -> bool {
        self.class(flow) == Some(FlowClass::Interior)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Stateless classifier over a fixed snapshot.
pub struct FlowClassifier;

impl FlowClassifier {
    /// Classify every flow that occurs in at least one exchange.
    ///
    /// An exchange on a flow id missing from the snapshot is a fatal
    /// [`LciError::UnknownFlow`].
    ///
    /// A flow is `Interior` iff it occurs on the input side and on the output
    /// side and that evidence does not consist solely of reference-marked
    /// exchanges: reference occurrences never make a flow interior by
    /// themselves, but a reference output matched by an ordinary input
    /// elsewhere does.
    pub fn classify(
        snapshot: &InventorySnapshot,
        compartments: &impl CompartmentLookup,
    ) -> Result<Classification, LciError> {
        let mut tallies: HashMap<FlowId, Tally> = HashMap::new();
        let mut seen_order: Vec<FlowId> = Vec::new();

        for process in snapshot.processes() {
            for exchange in &process.exchanges {
                if snapshot.flow(exchange.flow).is_none() {
                    return Err(LciError::UnknownFlow {
                        process: process.id,
                        flow: exchange.flow,
                    });
                }
                let tally = tallies.entry(exchange.flow).or_insert_with(|| {
                    seen_order.push(exchange.flow);
                    Tally::default()
                });
                match exchange.direction {
                    Direction::Input => tally.input = true,
                    Direction::Output => tally.output = true,
                }
                if !exchange.is_reference {
                    tally.non_reference = true;
                }
            }
        }

        let mut classes = HashMap::with_capacity(tallies.len());
        for flow in seen_order {
            let tally = tallies[&flow];
            let class = if compartments.is_elementary(flow) {
                FlowClass::Emission
            } else if tally.input && tally.output && tally.non_reference {
                FlowClass::Interior
            } else if tally.input && !tally.output {
                FlowClass::Cutoff
            } else {
                // Produced only, or reference-marked on both sides.
                FlowClass::ReferenceProduct
            };
            classes.insert(flow, class);
        }

        Ok(Classification { classes })
    }
}
