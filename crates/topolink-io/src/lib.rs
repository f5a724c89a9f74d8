//! # topolink-io: Source models, backing store and notifications
//!
//! Everything that crosses the process boundary lives here:
//!
//! - [`cim`] reads the per-feeder CIM RDF/XML export into a [`cim::CimModel`].
//! - [`store`] defines the [`store::TopologyStore`] seam the reconciliation passes
//!   query and patch, with [`store::MemoryStore`] as the in-process implementation
//!   (optionally persisted as a JSON snapshot).
//! - [`notify`] sends the best-effort "feeder updated" call after a file is processed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use topolink_io::{cim::parse_cim_file, store::MemoryStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let model = parse_cim_file(Path::new("feeder.xml"))?;
//!     let store = MemoryStore::open(Path::new("store.json"))?;
//!
//!     for circuit in model.current_feeders() {
//!         println!("{} -> {} devices", circuit.id, model.feeder_devices(&circuit.id).len());
//!     }
//!     store.save()?;
//!     Ok(())
//! }
//! ```

pub mod cim;
pub mod notify;
pub mod store;

pub use cim::{parse_cim_file, parse_cim_str, CimModel, SourceDevice};
pub use notify::{notify_best_effort, FeederNotifier, NoopNotifier, RecordingNotifier};
#[cfg(feature = "http")]
pub use notify::HttpNotifier;
pub use store::{MemoryStore, StoreError, StoreResult, StoreSnapshot, TopologyStore};
