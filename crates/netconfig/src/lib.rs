//! # netconfig
//!
//! Configuration-transaction engine for multi-vendor network fabrics.
//!
//! This crate provides:
//! - The canonical model of desired changes and persisted device state
//! - A directive compiler that reconciles shared resource groups (VLANs,
//!   VNIs, LAG bonds, routing instances, route prefixes) against persisted
//!   state
//! - A transaction coordinator driving discard, lock, edit, validate,
//!   commit and unlock with rollback on failure
//! - A comparator checking the live configuration against persisted state
//! - Recovery of desired changes from persisted state after a device swap
//! - A per-device [`ServiceDriver`] and a concurrent [`fleet`] runner
//!
//! ## Example
//!
//! ```no_run
//! use netconfig::{
//!     Context, CpSpec, DesiredChange, DeviceProfile, Operation, ProcessSessionFactory, ServiceDriver,
//!     ServiceType, Settings,
//! };
//! use statestore::SqliteStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open(Path::new("/var/lib/fabricctl/state.db"))?);
//! let leaf = DeviceProfile::new("leaf1", "10.0.0.11", "admin");
//! let ctx = Context::new(Settings::default(), vec![leaf.clone()], store);
//!
//! let mut change = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice("blue");
//! change.cps.push(CpSpec::new("swp1", 100));
//!
//! let mut driver = ServiceDriver::new(&ctx, leaf, Arc::new(ProcessSessionFactory));
//! driver.update(&change, Operation::Merge)?;
//! driver.disconnect();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comparator;
pub mod compiler;
pub mod context;
pub mod coordinator;
pub mod directive;
pub mod driver;
pub mod error;
pub mod fleet;
pub mod group;
pub mod model;
pub mod paths;
pub mod recovery;
pub mod tree;
pub mod vendor;

pub use comparator::{Comparison, Scope};
pub use compiler::{Compiled, compile};
pub use context::{CancelToken, Context, DeviceProfile, Settings};
pub use coordinator::{TransactionCoordinator, TransactionSession, TxState};
pub use directive::{Directive, DirectiveBatch, DirectiveKind, Stage};
pub use driver::{ProcessSessionFactory, ServiceDriver, SessionFactory};
pub use error::{CompileError, ConnectionError, ConnectionErrorKind, Error, Outcome, ReconstructError, Result};
pub use model::{CpSpec, DesiredChange, Operation, PersistedState, ServiceType};
pub use recovery::{RecoveryKind, RecoveryReport, RecoveryRequest, recover};
pub use tree::{ConfigTree, TreePath};
pub use vendor::{Vendor, VendorAdapter};
