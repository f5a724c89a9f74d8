//! # topolink-algo: Reconciliation passes
//!
//! Per feeder, the passes run in this order:
//!
//! | Pass | Module | Writes |
//! |------|--------|--------|
//! | Identifier translation | [`translate`] | id/node mappings, new device records |
//! | Source sync | [`sync`] | insert or patch one topology record per device |
//! | Connectivity repair | [`repair`] | compare-and-set endpoint updates |
//! | Cross-network stitch | [`stitch`] (with [`explore`]) | one sub-side endpoint, join descriptor |
//!
//! Every pass talks to the backing store through [`topolink_io::TopologyStore`], so
//! the same code runs against the in-process store and any other implementation.
//!
//! ## Example
//!
//! ```rust
//! use topolink_algo::{RepairConfig, RepairEngine, RepairOutcome};
//! use topolink_core::Topo;
//! use topolink_io::{MemoryStore, TopologyStore};
//!
//! let store = MemoryStore::new();
//! store.insert_topology(Topo::new("D1", "350000", "F1").with_nodes(Some("A"), Some("B"))).unwrap();
//! store.insert_topology(Topo::new("D2", "350000", "F1").with_nodes(None, Some("C"))).unwrap();
//!
//! let report = RepairEngine::new(&store, RepairConfig::default()).repair_feeder("F1").unwrap();
//! assert_eq!(report.outcome, RepairOutcome::Repaired);
//! ```

pub mod explore;
pub mod repair;
pub mod stitch;
pub mod sync;
pub mod translate;

pub use explore::{entry_paths, select_sub_head, EntryPath, SubHead};
pub use repair::{RepairConfig, RepairEngine, RepairOutcome, RepairReport};
pub use stitch::{JunctionHint, SkipReason, StitchOutcome, Stitcher};
pub use sync::{sync_device, SyncOutcome};
pub use translate::{IdentifierContext, ResolvedFeeder, Translator};
