// src/installer.rs

//! Public orchestrator (spec §6) — the typestate pipeline DESIGN NOTES asks
//! for in place of the original script's runtime `state` field. Each phase
//! consumes the previous phase's value by move, so most of the
//! `InvalidCallOrder` mistakes the original script could make (merging
//! before preparing, preparing twice) are unrepresentable: there is no
//! `Plan` left to call `prepare()` on a second time, because the first call
//! already moved it into a `PreparedPlan`.

use crate::check;
use crate::error::Result;
use crate::hardlink::HardlinkGroups;
use crate::model::{self, CheckReport, MoveList, PlanEntry};
use crate::progress::Progress;
use crate::recovery;
use crate::rename;
use crate::shadow;
use crate::stray;
use std::collections::HashSet;
use std::path::PathBuf;

/// Entry point: names the image and destination root for one install.
pub struct Installer {
    image: PathBuf,
    root: PathBuf,
    allowed_collision: Option<HashSet<PathBuf>>,
}

impl Installer {
    pub fn new(
        image: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        allowed_collision: Option<HashSet<PathBuf>>,
    ) -> Self {
        Self {
            image: image.into(),
            root: root.into(),
            allowed_collision,
        }
    }

    /// Run CHECK (component B). Always succeeds unless the image itself
    /// could not be walked consistently (`Error::FilesystemChanged`) — a
    /// non-empty report is a normal, successful result, not an error.
    pub fn check(&self) -> Result<CheckOutcome> {
        let (report, plan, groups) =
            check::check(&self.image, &self.root, self.allowed_collision.as_ref())?;
        Ok(CheckOutcome {
            report,
            entries: plan.entries,
            groups,
        })
    }
}

/// The result of CHECK: a report plus the plan it would produce if the
/// report turns out clean.
pub struct CheckOutcome {
    report: CheckReport,
    entries: Vec<PlanEntry>,
    groups: HardlinkGroups,
}

impl CheckOutcome {
    pub fn report(&self) -> &CheckReport {
        &self.report
    }

    pub fn is_clean(&self) -> bool {
        model::report_is_clean(&self.report)
    }

    /// Consume the outcome into a `Plan` ready for PREPARE, or hand back
    /// the report if it wasn't clean — the caller cannot accidentally
    /// `prepare()` a dirty plan because there is no way to get a `Plan`
    /// value out of a non-clean report.
    pub fn into_plan(self) -> std::result::Result<Plan, CheckReport> {
        if model::report_is_clean(&self.report) {
            Ok(Plan {
                entries: self.entries,
                groups: self.groups,
            })
        } else {
            Err(self.report)
        }
    }
}

/// A CHECK-clean plan, ready for PREPARE.
pub struct Plan {
    entries: Vec<PlanEntry>,
    groups: HardlinkGroups,
}

impl Plan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Run PREPARE (component D): materialize every shadow the plan needs.
    /// On success, consumes `self` into a `PreparedPlan` that can only be
    /// merged or rolled back, never re-prepared.
    pub fn prepare(self, progress: &mut Progress<'_>) -> Result<PreparedPlan> {
        let entries = shadow::materialize(self.entries, &self.groups, progress)?;
        let planned_strays = stray::plan_strays(&entries);
        Ok(PreparedPlan {
            entries,
            planned_strays,
        })
    }
}

/// Every shadow this plan needs has been materialized. The only ways
/// forward are MERGE or rollback; both consume `self`.
pub struct PreparedPlan {
    entries: Vec<PlanEntry>,
    planned_strays: MoveList,
}

impl PreparedPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn planned_strays(&self) -> &MoveList {
        &self.planned_strays
    }

    /// Run MERGE (component F): execute the ordered rename list.
    pub fn merge(self, progress: &mut Progress<'_>) -> Result<MergeOutcome> {
        let moves = rename::execute(&self.entries, &self.planned_strays, progress)?;
        Ok(MergeOutcome {
            entries: self.entries,
            moves,
        })
    }

    /// Abandon the plan before MERGE: remove every materialized shadow,
    /// leaving `root` exactly as it was before PREPARE ran.
    pub fn rollback(self) -> Result<()> {
        recovery::rollback(&self.entries)
    }

    /// The filelist a caller should persist before calling `merge`, so a
    /// later `replay` (after an interruption) has something to act on.
    pub fn filelist(&self) -> &[PlanEntry] {
        &self.entries
    }
}

/// MERGE completed. `cleanup` is the only remaining step, matching
/// `atomicinstall.py`'s `cleanup()` call after a successful merge.
pub struct MergeOutcome {
    entries: Vec<PlanEntry>,
    moves: MoveList,
}

impl MergeOutcome {
    /// The `(original, stray)` pairs produced during MERGE, for an external
    /// package database to reattribute (§3).
    pub fn moves(&self) -> &MoveList {
        &self.moves
    }

    /// Remove any `.MERGING-` shadow left over from a `merge_into` entry or
    /// a rename that, for whatever reason, did not consume its shadow.
    /// Under normal operation this is a no-op: every non-`merge_into`
    /// entry's shadow was renamed directly onto its destination by
    /// `rename::execute`.
    pub fn cleanup(self) -> Result<()> {
        recovery::rollback(&self.entries)
    }
}

/// Re-issue, idempotently, the renames a [`PreparedPlan::merge`] call left
/// unfinished after an interruption. `filelist` and `planned_strays` should
/// be whatever was persisted from the corresponding [`PreparedPlan`] before
/// `merge` was called (§4.G).
pub fn replay(filelist: &[PlanEntry], planned_strays: &MoveList) -> Result<MoveList> {
    recovery::replay(filelist, planned_strays)
}
