// src/lib.rs

//! Atomic image-into-root installer core.
//!
//! A three-phase merge engine — CHECK, PREPARE, MERGE — for grafting a
//! filesystem image tree onto a destination root using nothing but
//! reserved-sibling shadow directories and POSIX `rename()`. The only
//! atomicity guarantee is `rename()`'s own: each entry lands (or doesn't)
//! in a single syscall, with no multi-file transaction wrapped around it.
//!
//! # Architecture
//!
//! - `walk` (component A): pairs every image entry with its destination
//!   counterpart and classifies both by kind.
//! - `hardlink` (component C): groups image entries sharing a source
//!   inode so PREPARE can recreate hardlink topology across the copy.
//! - `check` (component B): applies the reserved-name, collision and
//!   leftover-stray rules and builds the plan.
//! - `shadow` (component D): materializes `.MERGING-` shadows during
//!   PREPARE.
//! - `stray` (component E): plans `.STRAY-` sidelining for type-mismatched
//!   destinations.
//! - `rename` (component F): executes the ordered rename list — MERGE.
//! - `recovery` (component G): `rollback` (pre-MERGE) and `replay`
//!   (post-interruption) for the two ways an aborted run gets resolved.
//! - `installer`: the public, typestate-checked orchestrator tying the
//!   phases together.

pub mod check;
mod error;
pub mod hardlink;
pub mod installer;
pub mod model;
pub mod progress;
pub mod recovery;
pub mod rename;
pub mod shadow;
pub mod stray;
pub mod walk;

pub use error::{Error, Result};
pub use installer::{replay, CheckOutcome, Installer, MergeOutcome, Plan, PreparedPlan};
pub use model::{
    CheckReport, FileKind, HardlinkGroup, MoveList, PlanEntry, ProblemCategory, StatSnapshot,
};
pub use progress::{Progress, ProgressEvent};
