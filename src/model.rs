//! Top-level model: ties classification, registration, allocation, matrix
//! assembly and ordering together over one immutable snapshot.

use tracing::{debug, warn};

use crate::allocation::{AllocationPolicy, AllocationResolver, SurplusCoproduct};
use crate::classify::{Classification, FlowClassifier};
use crate::compartment::{CompartmentLookup, SnapshotCompartments};
use crate::entity::InventorySnapshot;
use crate::error::{Diagnostic, LciError};
use crate::matrix::{ExteriorRow, MatrixBuilder, ProducerSelection, SparseMatrix};
use crate::ordering::{ComponentGraph, ComponentOrdering};
use crate::registry::{Commodity, CommodityRegistry};

/// Recognized build options.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub allocation_policy: AllocationPolicy,
    /// Use outputs ∩ interior as R(p) when no reference is declared.
    pub reference_fallback: bool,
    pub producer_selection: ProducerSelection,
}

impl ModelConfig {
    pub fn new() -> Self {
        Self {
            allocation_policy: AllocationPolicy::default(),
            reference_fallback: true,
            producer_selection: ProducerSelection::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a downstream LCI computation needs: the matrices, the index
/// structures, the partial ordering and the allocation bookkeeping.
#[derive(Debug, Clone)]
pub struct SystemPartition {
    /// Square interior technology matrix, commodity by commodity.
    pub a: SparseMatrix,
    /// Exterior matrix, exterior flow by commodity.
    pub b: SparseMatrix,
    /// Active commodities in column order.
    pub commodities: Vec<Commodity>,
    pub exterior_rows: Vec<ExteriorRow>,
    pub ordering: ComponentOrdering,
    /// False iff a surplus co-product was recorded. Inspect `diagnostics`
    /// before trusting this.
    pub fully_allocated: bool,
    pub surplus: Vec<SurplusCoproduct>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Batch model over one snapshot. Rebuilds everything from scratch on each
/// call; derived state is never mutated incrementally.
pub struct InventoryModel {
    snapshot: InventorySnapshot,
    config: ModelConfig,
}

impl InventoryModel {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self::with_config(snapshot, ModelConfig::new())
    }

    pub fn with_config(snapshot: InventorySnapshot, config: ModelConfig) -> Self {
        Self { snapshot, config }
    }

    pub fn snapshot(&self) -> &InventorySnapshot {
        &self.snapshot
    }

    /// Build the full partition using the snapshot's own compartment names to
    /// decide elementary status.
    pub fn build(&self) -> Result<SystemPartition, LciError> {
        let compartments = SnapshotCompartments::from_snapshot(&self.snapshot);
        self.build_with_compartments(&compartments)
    }

    /// Build with a caller-supplied compartment lookup.
    pub fn build_with_compartments(
        &self,
        compartments: &impl CompartmentLookup,
    ) -> Result<SystemPartition, LciError> {
        let classification = FlowClassifier::classify(&self.snapshot, compartments)?;
        self.build_classified(&classification)
    }

    fn build_classified(
        &self,
        classification: &Classification,
    ) -> Result<SystemPartition, LciError> {
        let mut diagnostics = Vec::new();
        let registry = CommodityRegistry::build(
            &self.snapshot,
            classification,
            self.config.reference_fallback,
            &mut diagnostics,
        );
        let plan = AllocationResolver::resolve(
            &self.snapshot,
            &registry,
            &self.config.allocation_policy,
            &mut diagnostics,
        );
        let system = MatrixBuilder::new(
            &self.snapshot,
            classification,
            &registry,
            &plan,
            &self.config.producer_selection,
        )
        .build()?;
        let ordering = ComponentGraph::from_system(&system).find_components();

        let background_components = ordering.background_components();
        if background_components > 1 {
            warn!(count = background_components, "multiple disjoint background components");
            diagnostics.push(Diagnostic::MultipleBackgroundComponents {
                count: background_components,
            });
        }
        debug!(
            commodities = system.columns.len(),
            exterior_rows = system.exterior_rows.len(),
            background = ordering.background().len(),
            "partition built"
        );

        Ok(SystemPartition {
            a: system.a,
            b: system.b,
            commodities: system.columns,
            exterior_rows: system.exterior_rows,
            ordering,
            fully_allocated: plan.fully_allocated(),
            surplus: plan.surplus().to_vec(),
            diagnostics,
        })
    }
}
