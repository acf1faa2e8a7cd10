//! Ride Core - log line classification, ride assembly and heart rate watch
//!
//! # Architecture
//!
//! ```text
//! raw line → classify() → ClassifiedRecord
//!     ├─→ RideAssembler (WaitingForRide ⇄ Collecting)
//!     │       ↓ on end of ride
//!     │   build_batch() → CommitSink.write_batch → NotificationPort.notify
//!     │
//!     └─→ AnomalyWatcher (current rider cache)
//!             ↓ outside [40, 220 - age]
//!         AlertPort.alert
//! ```
//!
//! `RecoveryCoordinator` runs once before the assembler to seed ride numbering
//! from the committed rows.

pub mod anomaly;
pub mod assembler;
pub mod batch;
pub mod parser;
pub mod recovery;
pub mod summary;

pub use anomaly::{compute_age, AnomalyWatcher, HeartRateAlert, HeartRateBand};
pub use assembler::{AssemblerStats, BufferState, RideAssembler, RideBuffer};
pub use batch::{build_batch, RideBatch, RideRow};
pub use parser::{classify, ClassifiedRecord, RecordKind, Telemetry, UserProfile};
pub use recovery::{RecoveryCoordinator, RecoveryPlan};
pub use summary::RideSummary;
