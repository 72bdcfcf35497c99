//! # lci-partition
//!
//! Partial ordering of a life-cycle-inventory database.
//!
//! Given an immutable snapshot of processes and their exchanges, this crate
//! classifies flows, registers commodities (unique process/flow pairs),
//! resolves multi-output allocation, assembles the sparse interior matrix A
//! and exterior matrix B, and partitions the commodity graph into strongly
//! connected components: a *background* of mutually dependent commodities
//! and a topologically ordered *foreground* above it. The ordering lets a
//! caller invert the background block once and propagate results forward
//! without re-inverting.
//!
//! ```
//! use lci_partition::{Exchange, Flow, InventoryModel, InventorySnapshot, Process};
//!
//! let steel = Flow::new("steel", "technosphere", "kg");
//! let co2 = Flow::new("carbon dioxide", "air", "kg");
//! let mill = Process::new("steel mill")
//!     .with_exchange(Exchange::output(steel.id, 1.0).reference())
//!     .with_exchange(Exchange::output(co2.id, 1.8));
//! let fab = Process::new("fabrication")
//!     .with_exchange(Exchange::input(steel.id, 0.4));
//!
//! let snapshot = InventorySnapshot::new(vec![steel, co2], vec![mill, fab]);
//! let partition = InventoryModel::new(snapshot).build().unwrap();
//! assert!(partition.fully_allocated);
//! assert!(partition.a.is_square());
//! ```

pub mod allocation;
pub mod classify;
pub mod compartment;
pub mod entity;
pub mod error;
pub mod matrix;
pub mod model;
pub mod ordering;
pub mod registry;

pub use allocation::{AllocationPolicy, AllocationPlan, AllocationResolver, SurplusCoproduct};
pub use classify::{Classification, FlowClass, FlowClassifier};
pub use compartment::{CompartmentLookup, SnapshotCompartments, ELEMENTARY_COMPARTMENTS};
pub use entity::{Direction, Exchange, Flow, FlowId, InventorySnapshot, Process, ProcessId};
pub use error::{Diagnostic, LciError};
pub use matrix::{ExteriorKind, ExteriorRow, MatrixBuilder, MatrixSystem, ProducerSelection, SparseMatrix};
pub use model::{InventoryModel, ModelConfig, SystemPartition};
pub use ordering::{ComponentGraph, ComponentOrdering, Scc};
pub use registry::{Commodity, CommodityRegistry};
