//! Assembly of the interior matrix A and the exterior matrix B from
//! classified, allocated exchanges.
//!
//! Column j belongs to one active commodity: its diagonal is the
//! sign-normalized reference amount, interior inputs become negative
//! off-diagonal entries against the resolved producer's row, and everything
//! exterior lands in B with sign +output / -input, scaled by the column's
//! allocation fraction.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::allocation::AllocationPlan;
use crate::classify::{Classification, FlowClass};
use crate::entity::{Direction, Exchange, FlowId, InventorySnapshot, Process, ProcessId};
use crate::error::LciError;
use crate::registry::{Commodity, CommodityRegistry};

/// Column-major sparse matrix. Entries are accumulated during construction
/// and merged row-sorted on finalize; exact zeros are dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    cols: Vec<Vec<(usize, f64)>>,
}

impl SparseMatrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            cols: vec![Vec::new(); ncols],
        }
    }

    pub(crate) fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.nrows && col < self.ncols);
        self.cols[col].push((row, value));
    }

    /// Sort each column by row, merge duplicate coordinates, drop zeros.
    pub(crate) fn finalize(&mut self) {
        for col in &mut self.cols {
            col.sort_by_key(|&(row, _)| row);
            let mut merged: Vec<(usize, f64)> = Vec::with_capacity(col.len());
            for &(row, value) in col.iter() {
                match merged.last_mut() {
                    Some((last_row, last_value)) if *last_row == row => *last_value += value,
                    _ => merged.push((row, value)),
                }
            }
            merged.retain(|&(_, value)| value != 0.0);
            *col = merged;
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cols[col]
            .binary_search_by_key(&row, |&(r, _)| r)
            .map(|i| self.cols[col][i].1)
            .unwrap_or(0.0)
    }

    /// Nonzero entries of one column as (row, value), ascending by row.
    pub fn column(&self, col: usize) -> &[(usize, f64)] {
        &self.cols[col]
    }

    pub fn nnz(&self) -> usize {
        self.cols.iter().map(Vec::len).sum()
    }

    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.ncols]; self.nrows];
        for (col, entries) in self.cols.iter().enumerate() {
            for &(row, value) in entries {
                dense[row][col] = value;
            }
        }
        dense
    }
}

/// How a consumer column picks among several active producers of a flow.
#[derive(Debug, Clone, Default)]
pub enum ProducerSelection {
    /// Fail the build with [`LciError::AmbiguousProducer`].
    #[default]
    FailOnAmbiguous,
    /// Caller-supplied flow -> producing process map.
    Explicit(HashMap<FlowId, ProcessId>),
}

/// Exterior row kind, derived from the flow's classification (or from the
/// surplus/cutoff routing that created the row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExteriorKind {
    Cutoff,
    Emission,
    ReferenceProduct,
}

/// One row of the exterior matrix B.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExteriorRow {
    pub index: usize,
    pub flow: FlowId,
    pub kind: ExteriorKind,
}

/// Assembled matrices plus the index structures tying them back to the
/// registry.
#[derive(Debug, Clone)]
pub struct MatrixSystem {
    pub a: SparseMatrix,
    pub b: SparseMatrix,
    /// Active commodities in column order.
    pub columns: Vec<Commodity>,
    pub exterior_rows: Vec<ExteriorRow>,
    /// Columns whose process consumes its own product beyond the reference
    /// diagonal. Needed to classify singleton components.
    pub(crate) self_loops: HashSet<usize>,
}

impl MatrixSystem {
    /// Matrix column of a registry commodity index, if active.
    pub fn column_of(&self, commodity: usize) -> Option<usize> {
        self.columns.iter().position(|c| c.index == commodity)
    }
}

/// Builds A and B for one snapshot under a resolved allocation plan.
pub struct MatrixBuilder<'a> {
    snapshot: &'a InventorySnapshot,
    classification: &'a Classification,
    registry: &'a CommodityRegistry,
    plan: &'a AllocationPlan,
    selection: &'a ProducerSelection,
}

struct ExteriorIndex {
    rows: Vec<ExteriorRow>,
    by_flow: HashMap<FlowId, usize>,
    entries: Vec<(usize, usize, f64)>,
}

impl ExteriorIndex {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            by_flow: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn add(&mut self, flow: FlowId, kind: ExteriorKind, col: usize, value: f64) {
        let row = *self.by_flow.entry(flow).or_insert_with(|| {
            let index = self.rows.len();
            self.rows.push(ExteriorRow { index, flow, kind });
            index
        });
        self.entries.push((row, col, value));
    }
}

impl<'a> MatrixBuilder<'a> {
    pub fn new(
        snapshot: &'a InventorySnapshot,
        classification: &'a Classification,
        registry: &'a CommodityRegistry,
        plan: &'a AllocationPlan,
        selection: &'a ProducerSelection,
    ) -> Self {
        Self {
            snapshot,
            classification,
            registry,
            plan,
            selection,
        }
    }

    // ── Assembly ────────────────────────────────────────────────────────────

    pub fn build(&self) -> Result<MatrixSystem, LciError> {
        let active = self.plan.active_indices();
        let col_of: HashMap<usize, usize> = active
            .iter()
            .enumerate()
            .map(|(col, &commodity)| (commodity, col))
            .collect();
        let n = active.len();

        let mut a = SparseMatrix::new(n, n);
        let mut exterior = ExteriorIndex::new();
        let mut self_loops = HashSet::new();

        for (col, &commodity_idx) in active.iter().enumerate() {
            let commodity = self.registry.get(commodity_idx);
            // Commodities are registered from snapshot processes.
            let Some(process) = self.snapshot.process(commodity.process) else {
                continue;
            };
            let alpha = self.plan.fraction(commodity_idx).unwrap_or(1.0);

            a.add(col, col, commodity.reference_amount);
            self.fill_column(
                col,
                commodity,
                process,
                alpha,
                &col_of,
                &mut a,
                &mut exterior,
                &mut self_loops,
            )?;
        }

        a.finalize();
        let mut b = SparseMatrix::new(exterior.rows.len(), n);
        for (row, col, value) in &exterior.entries {
            b.add(*row, *col, *value);
        }
        b.finalize();

        let columns = active
            .iter()
            .map(|&i| self.registry.get(i).clone())
            .collect();
        Ok(MatrixSystem {
            a,
            b,
            columns,
            exterior_rows: exterior.rows,
            self_loops,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_column(
        &self,
        col: usize,
        commodity: &Commodity,
        process: &Process,
        alpha: f64,
        col_of: &HashMap<usize, usize>,
        a: &mut SparseMatrix,
        exterior: &mut ExteriorIndex,
        self_loops: &mut HashSet<usize>,
    ) -> Result<(), LciError> {
        let reference_indices = self.reference_indices(process);

        for (idx, exchange) in process.exchanges.iter().enumerate() {
            if idx == commodity.exchange_idx {
                continue;
            }
            if reference_indices.contains(&idx) {
                self.fill_coproduct(col, process, exchange, alpha, col_of, a, exterior);
                continue;
            }
            if exchange.amount == 0.0 {
                continue;
            }
            let Some(class) = self.classification.class(exchange.flow) else {
                continue;
            };
            match class {
                FlowClass::Interior => {
                    match self.resolve_producer(exchange.flow, exchange.producer_link, col_of)? {
                        Some(producer) => {
                            let row = col_of[&producer];
                            let value = alpha * exchange.amount;
                            match exchange.direction {
                                Direction::Input => a.add(row, col, -value),
                                Direction::Output => a.add(row, col, value),
                            }
                            if row == col {
                                self_loops.insert(col);
                            }
                        }
                        // No surviving producer: the dependency degrades to a
                        // cutoff supply/demand.
                        None => exterior.add(
                            exchange.flow,
                            ExteriorKind::Cutoff,
                            col,
                            alpha * exchange.signed_amount(),
                        ),
                    }
                }
                FlowClass::Emission => exterior.add(
                    exchange.flow,
                    ExteriorKind::Emission,
                    col,
                    alpha * exchange.signed_amount(),
                ),
                FlowClass::Cutoff => exterior.add(
                    exchange.flow,
                    ExteriorKind::Cutoff,
                    col,
                    alpha * exchange.signed_amount(),
                ),
                FlowClass::ReferenceProduct => exterior.add(
                    exchange.flow,
                    ExteriorKind::ReferenceProduct,
                    col,
                    alpha * exchange.signed_amount(),
                ),
            }
        }
        Ok(())
    }

    /// Handle a reference exchange of the column's process that is not the
    /// column's own: a sibling column, a substituted co-product, a surplus
    /// record, or a non-interior reference product.
    fn fill_coproduct(
        &self,
        col: usize,
        process: &Process,
        exchange: &Exchange,
        alpha: f64,
        col_of: &HashMap<usize, usize>,
        a: &mut SparseMatrix,
        exterior: &mut ExteriorIndex,
    ) {
        let Some(sibling) = self.registry.lookup(process.id, exchange.flow) else {
            return;
        };
        if col_of.contains_key(&sibling) {
            // Its own column (explicit allocation), or a duplicate reference
            // exchange on this column's flow.
            return;
        }
        if let Some(target) = self.plan.substitution_target(process.id, exchange.flow) {
            match col_of.get(&target) {
                // Joint production enters the substitute's row positively;
                // the substitute's activity solves as a signed residual.
                Some(&row) => a.add(row, col, exchange.signed_amount()),
                None => {
                    warn!(process = %process.id, flow = %exchange.flow,
                        "substitution target lost its column; routing co-product to cutoff");
                    exterior.add(
                        exchange.flow,
                        ExteriorKind::Cutoff,
                        col,
                        exchange.signed_amount(),
                    );
                }
            }
            return;
        }
        if self.plan.is_surplus(process.id, exchange.flow) {
            // Raw, unallocated supply entry.
            exterior.add(
                exchange.flow,
                ExteriorKind::Cutoff,
                col,
                exchange.signed_amount(),
            );
            return;
        }
        if !self.registry.get(sibling).is_interior {
            let kind = match self.classification.class(exchange.flow) {
                Some(FlowClass::Emission) => ExteriorKind::Emission,
                _ => ExteriorKind::ReferenceProduct,
            };
            exterior.add(exchange.flow, kind, col, alpha * exchange.signed_amount());
        }
    }

    /// All reference exchange positions of a process: the declared ones plus
    /// any fallback-derived commodity definitions.
    fn reference_indices(&self, process: &Process) -> HashSet<usize> {
        let mut indices: HashSet<usize> = process.reference_indices().into_iter().collect();
        for &commodity in self.registry.of_process(process.id) {
            indices.insert(self.registry.get(commodity).exchange_idx);
        }
        indices
    }

    // ── Producer resolution ─────────────────────────────────────────────────

    /// Pick the producing commodity for an interior flow, in priority order:
    /// explicit exchange link, producer-selection config, sole candidate,
    /// unique market designation. Ambiguity is a fatal error by default.
    fn resolve_producer(
        &self,
        flow: FlowId,
        link: Option<ProcessId>,
        col_of: &HashMap<usize, usize>,
    ) -> Result<Option<usize>, LciError> {
        let active = |c: &usize| col_of.contains_key(c);

        if let Some(producer) = link {
            match self.registry.lookup(producer, flow).filter(active) {
                Some(c) => return Ok(Some(c)),
                None => {
                    warn!(flow = %flow, producer = %producer,
                        "producer link does not name an active commodity; falling back");
                }
            }
        }
        if let ProducerSelection::Explicit(map) = self.selection {
            if let Some(&producer) = map.get(&flow) {
                match self.registry.lookup(producer, flow).filter(active) {
                    Some(c) => return Ok(Some(c)),
                    None => {
                        warn!(flow = %flow, producer = %producer,
                            "producer selection does not name an active commodity; falling back");
                    }
                }
            }
        }

        let candidates: Vec<usize> = self
            .registry
            .producers_of(flow)
            .iter()
            .copied()
            .filter(|c| active(c))
            .collect();
        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            _ => {
                let markets: Vec<usize> = candidates
                    .iter()
                    .copied()
                    .filter(|&c| {
                        self.snapshot
                            .process(self.registry.get(c).process)
                            .is_some_and(|p| p.is_market)
                    })
                    .collect();
                if let [market] = markets.as_slice() {
                    return Ok(Some(*market));
                }
                let mut processes: Vec<ProcessId> = candidates
                    .iter()
                    .map(|&c| self.registry.get(c).process)
                    .collect();
                processes.sort_unstable();
                Err(LciError::AmbiguousProducer {
                    flow,
                    candidates: processes,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocationPlan, AllocationPolicy, AllocationResolver};
    use crate::classify::FlowClassifier;
    use crate::compartment::SnapshotCompartments;
    use crate::entity::Flow;
    use crate::error::Diagnostic;

    fn build(
        snapshot: &InventorySnapshot,
        policy: &AllocationPolicy,
        selection: &ProducerSelection,
    ) -> Result<(MatrixSystem, Vec<Diagnostic>), LciError> {
        let compartments = SnapshotCompartments::from_snapshot(snapshot);
        let classification = FlowClassifier::classify(snapshot, &compartments)?;
        let mut diagnostics = Vec::new();
        let registry =
            CommodityRegistry::build(snapshot, &classification, true, &mut diagnostics);
        let plan = AllocationResolver::resolve(snapshot, &registry, policy, &mut diagnostics);
        let system =
            MatrixBuilder::new(snapshot, &classification, &registry, &plan, selection).build()?;
        Ok((system, diagnostics))
    }

    #[test]
    fn chain_columns_carry_signed_entries() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let co2 = Flow::new("co2", "air", "kg");
        let fuel = Flow::new("fuel", "technosphere", "MJ");
        let p1 = Process::new("p1")
            .with_exchange(Exchange::output(x.id, 2.0).reference())
            .with_exchange(Exchange::input(fuel.id, 10.0))
            .with_exchange(Exchange::output(co2.id, 1.5));
        let p2 = Process::new("p2")
            .with_exchange(Exchange::output(y.id, 1.0).reference())
            .with_exchange(Exchange::input(x.id, 0.4));
        let snapshot = InventorySnapshot::new(
            vec![x.clone(), y, co2.clone(), fuel.clone()],
            vec![p1, p2],
        );

        let (system, diagnostics) = build(
            &snapshot,
            &AllocationPolicy::Surplus,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();
        assert!(diagnostics.is_empty());

        // Column 0 = (p1, x), column 1 = (p2, y), registration order.
        assert!(system.a.is_square());
        assert_eq!(system.a.get(0, 0), 2.0);
        assert_eq!(system.a.get(1, 1), 1.0);
        assert_eq!(system.a.get(0, 1), -0.4);
        assert_eq!(system.a.get(1, 0), 0.0);

        // B: fuel cutoff -10 and co2 emission +1.5, both in p1's column.
        let fuel_row = system
            .exterior_rows
            .iter()
            .find(|r| r.flow == fuel.id)
            .unwrap();
        let co2_row = system
            .exterior_rows
            .iter()
            .find(|r| r.flow == co2.id)
            .unwrap();
        assert_eq!(fuel_row.kind, ExteriorKind::Cutoff);
        assert_eq!(co2_row.kind, ExteriorKind::Emission);
        assert_eq!(system.b.get(fuel_row.index, 0), -10.0);
        assert_eq!(system.b.get(co2_row.index, 0), 1.5);
    }

    #[test]
    fn ambiguous_producer_fails_without_configuration() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let a = Process::new("a").with_exchange(Exchange::output(x.id, 1.0).reference());
        let b = Process::new("b").with_exchange(Exchange::output(x.id, 1.0).reference());
        let user = Process::new("user")
            .with_exchange(Exchange::output(y.id, 1.0).reference())
            .with_exchange(Exchange::input(x.id, 1.0));
        let (a_id, b_id) = (a.id, b.id);
        let snapshot = InventorySnapshot::new(vec![x.clone(), y], vec![a, b, user]);

        let err = build(
            &snapshot,
            &AllocationPolicy::Surplus,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap_err();
        let mut expected = vec![a_id, b_id];
        expected.sort_unstable();
        assert_eq!(
            err,
            LciError::AmbiguousProducer {
                flow: x.id,
                candidates: expected
            }
        );
    }

    #[test]
    fn producer_selection_map_resolves_ambiguity() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let a = Process::new("a").with_exchange(Exchange::output(x.id, 1.0).reference());
        let b = Process::new("b").with_exchange(Exchange::output(x.id, 1.0).reference());
        let user = Process::new("user")
            .with_exchange(Exchange::output(y.id, 1.0).reference())
            .with_exchange(Exchange::input(x.id, 3.0));
        let b_id = b.id;
        let snapshot = InventorySnapshot::new(vec![x.clone(), y], vec![a, b, user]);

        let selection = ProducerSelection::Explicit(HashMap::from([(x.id, b_id)]));
        let (system, _) = build(&snapshot, &AllocationPolicy::Surplus, &selection).unwrap();

        // Columns: 0 = (a, x), 1 = (b, x), 2 = (user, y).
        assert_eq!(system.a.get(1, 2), -3.0);
        assert_eq!(system.a.get(0, 2), 0.0);
    }

    #[test]
    fn exchange_link_beats_market_designation() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let a = Process::new("a").with_exchange(Exchange::output(x.id, 1.0).reference());
        let market = Process::new("market for x")
            .market()
            .with_exchange(Exchange::output(x.id, 1.0).reference());
        let a_id = a.id;
        let user = Process::new("user")
            .with_exchange(Exchange::output(y.id, 1.0).reference())
            .with_exchange(Exchange::input(x.id, 2.0).linked_to(a_id));
        let snapshot = InventorySnapshot::new(vec![x.clone(), y], vec![a, market, user]);

        let (system, _) = build(
            &snapshot,
            &AllocationPolicy::Surplus,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();
        // Columns: 0 = (a, x), 1 = (market, x), 2 = (user, y).
        assert_eq!(system.a.get(0, 2), -2.0);
        assert_eq!(system.a.get(1, 2), 0.0);
    }

    #[test]
    fn market_designation_resolves_when_no_link_exists() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let a = Process::new("a").with_exchange(Exchange::output(x.id, 1.0).reference());
        let market = Process::new("market for x")
            .market()
            .with_exchange(Exchange::output(x.id, 1.0).reference());
        let user = Process::new("user")
            .with_exchange(Exchange::output(y.id, 1.0).reference())
            .with_exchange(Exchange::input(x.id, 2.0));
        let snapshot = InventorySnapshot::new(vec![x, y], vec![a, market, user]);

        let (system, _) = build(
            &snapshot,
            &AllocationPolicy::Surplus,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();
        assert_eq!(system.a.get(1, 2), -2.0);
    }

    #[test]
    fn surplus_coproduct_lands_in_b_not_a() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let host = Process::new("host")
            .with_exchange(Exchange::output(x.id, 1.0).reference())
            .with_exchange(Exchange::output(y.id, 0.5).reference());
        let sink = Process::new("sink")
            .with_exchange(Exchange::input(x.id, 1.0))
            .with_exchange(Exchange::input(y.id, 1.0));
        let snapshot = InventorySnapshot::new(vec![x, y.clone()], vec![host, sink]);

        let (system, _) = build(
            &snapshot,
            &AllocationPolicy::Surplus,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();

        // Single column: (host, x). The y co-product supplies B.
        assert_eq!(system.a.ncols(), 1);
        let y_row = system
            .exterior_rows
            .iter()
            .find(|r| r.flow == y.id)
            .unwrap();
        assert_eq!(y_row.kind, ExteriorKind::Cutoff);
        assert_eq!(system.b.get(y_row.index, 0), 0.5);
    }

    #[test]
    fn substitution_coproduct_enters_target_row_positively() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let host = Process::new("host")
            .with_exchange(Exchange::output(x.id, 1.0).reference())
            .with_exchange(Exchange::output(y.id, 0.5).reference());
        let y_maker =
            Process::new("y maker").with_exchange(Exchange::output(y.id, 1.0).reference());
        let sink = Process::new("sink")
            .with_exchange(Exchange::input(x.id, 1.0))
            .with_exchange(Exchange::input(y.id, 1.0));
        let (host_id, y_maker_id) = (host.id, y_maker.id);
        let snapshot =
            InventorySnapshot::new(vec![x.clone(), y.clone()], vec![host, y_maker, sink]);

        let policy =
            AllocationPolicy::Substitution(HashMap::from([((host_id, y.id), y_maker_id)]));
        let (system, diagnostics) = build(
            &snapshot,
            &policy,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();
        assert!(diagnostics.is_empty());

        // Columns: 0 = (host, x), 1 = (y maker, y). The joint y output enters
        // the substitute's row positively; its activity solves as a signed
        // residual against demand.
        assert_eq!(system.a.get(0, 0), 1.0);
        assert_eq!(system.a.get(1, 1), 1.0);
        assert_eq!(system.a.get(1, 0), 0.5);
        assert!(system.exterior_rows.iter().all(|r| r.flow != y.id));
    }

    #[test]
    fn lost_substitution_target_falls_back_to_cutoff() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let host = Process::new("host")
            .with_exchange(Exchange::output(x.id, 1.0).reference())
            .with_exchange(Exchange::output(y.id, 0.5).reference());
        let y_maker =
            Process::new("y maker").with_exchange(Exchange::output(y.id, 1.0).reference());
        let sink = Process::new("sink")
            .with_exchange(Exchange::input(x.id, 1.0))
            .with_exchange(Exchange::input(y.id, 1.0));
        let (host_id, y_maker_id) = (host.id, y_maker.id);
        let snapshot =
            InventorySnapshot::new(vec![x.clone(), y.clone()], vec![host, y_maker, sink]);

        let compartments = SnapshotCompartments::from_snapshot(&snapshot);
        let classification = FlowClassifier::classify(&snapshot, &compartments).unwrap();
        let mut diagnostics = Vec::new();
        let registry =
            CommodityRegistry::build(&snapshot, &classification, true, &mut diagnostics);

        // Plan with a substitution link whose target commodity never got a
        // column.
        let mut plan = AllocationPlan::default();
        plan.activate(host_id, registry.lookup(host_id, x.id).unwrap(), 1.0);
        plan.link_substitution(host_id, y.id, registry.lookup(y_maker_id, y.id).unwrap());

        let system = MatrixBuilder::new(
            &snapshot,
            &classification,
            &registry,
            &plan,
            &ProducerSelection::FailOnAmbiguous,
        )
        .build()
        .unwrap();

        assert_eq!(system.a.ncols(), 1);
        let y_row = system
            .exterior_rows
            .iter()
            .find(|r| r.flow == y.id)
            .unwrap();
        assert_eq!(y_row.kind, ExteriorKind::Cutoff);
        assert_eq!(system.b.get(y_row.index, 0), 0.5);
    }

    #[test]
    fn explicit_allocation_scales_off_reference_exchanges() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let co2 = Flow::new("co2", "air", "kg");
        let host = Process::new("host")
            .with_exchange(Exchange::output(x.id, 1.0).reference())
            .with_exchange(Exchange::output(y.id, 2.0).reference())
            .with_exchange(Exchange::output(co2.id, 4.0));
        let host_id = host.id;
        let sink = Process::new("sink")
            .with_exchange(Exchange::input(x.id, 1.0))
            .with_exchange(Exchange::input(y.id, 1.0));
        let snapshot = InventorySnapshot::new(vec![x.clone(), y.clone(), co2.clone()], vec![host, sink]);

        let policy = AllocationPolicy::Explicit(HashMap::from([
            ((host_id, x.id), 0.25),
            ((host_id, y.id), 0.75),
        ]));
        let (system, diagnostics) = build(
            &snapshot,
            &policy,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();
        assert!(diagnostics.is_empty());

        // Two columns for the host; diagonals unscaled, emissions split.
        assert_eq!(system.a.get(0, 0), 1.0);
        assert_eq!(system.a.get(1, 1), 2.0);
        let co2_row = system
            .exterior_rows
            .iter()
            .find(|r| r.flow == co2.id)
            .unwrap();
        assert_eq!(system.b.get(co2_row.index, 0), 1.0);
        assert_eq!(system.b.get(co2_row.index, 1), 3.0);
    }

    #[test]
    fn zero_amount_exchanges_stay_out_of_the_sparse_matrices() {
        let x = Flow::new("x", "technosphere", "kg");
        let y = Flow::new("y", "technosphere", "kg");
        let maker = Process::new("maker").with_exchange(Exchange::output(x.id, 1.0).reference());
        let user = Process::new("user")
            .with_exchange(Exchange::output(y.id, 1.0).reference())
            .with_exchange(Exchange::input(x.id, 0.0));
        let snapshot = InventorySnapshot::new(vec![x, y], vec![maker, user]);

        let (system, _) = build(
            &snapshot,
            &AllocationPolicy::Surplus,
            &ProducerSelection::FailOnAmbiguous,
        )
        .unwrap();
        // Only the two diagonals survive.
        assert_eq!(system.a.nnz(), 2);
        assert_eq!(system.b.nnz(), 0);
    }

    #[test]
    fn sparse_matrix_merges_and_drops_cancelled_entries() {
        let mut m = SparseMatrix::new(2, 2);
        m.add(0, 0, 1.0);
        m.add(0, 0, 2.0);
        m.add(1, 0, 3.0);
        m.add(1, 0, -3.0);
        m.finalize();
        assert_eq!(m.get(0, 0), 3.0);
        assert_eq!(m.get(1, 0), 0.0);
        assert_eq!(m.nnz(), 1);
        assert_eq!(m.to_dense(), vec![vec![3.0, 0.0], vec![0.0, 0.0]]);
    }
}
