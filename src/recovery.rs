// src/recovery.rs

//! Recovery surface (component G, spec §4.G) — the two ways an interrupted
//! run can be resolved without replaying CHECK/PREPARE from scratch.
//!
//! `rollback` is for before MERGE has started: it only ever has to remove
//! `.MERGING-` shadows, since nothing under `root`'s real namespace has
//! been touched yet. `replay` is for after MERGE started and was
//! interrupted partway: every rename it issues is idempotent, since a
//! rename whose source no longer exists is assumed to have already
//! succeeded (§6: MERGE is built from single atomic renames, so "partway"
//! always means a strict prefix of the filelist completed).

use crate::error::{Error, Result};
use crate::model::{stray_sibling, FileKind, MoveList, PlanEntry};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Check that `entries` has a shape consistent with a real `check`/`prepare`
/// output, i.e. one of the phases this module knows how to recover. This is
/// the validation the free-standing recovery functions need precisely
/// because they can be handed a filelist reconstructed from persisted state
/// rather than a live `Plan`/`PreparedPlan` value, so the compile-time
/// phase guarantees `installer.rs` relies on don't apply here.
fn validate_filelist(entries: &[PlanEntry]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for entry in entries {
        if !seen.insert(&entry.rel) {
            return Err(Error::InvalidCallOrder(format!(
                "{} appears more than once in the filelist",
                entry.rel.display()
            )));
        }
        if entry.whole_dir && entry.merge_into {
            return Err(Error::InvalidCallOrder(format!(
                "{} is marked both whole_dir and merge_into",
                entry.rel.display()
            )));
        }
        if entry.merge_into && entry.src_kind != FileKind::Directory {
            return Err(Error::InvalidCallOrder(format!(
                "{} is marked merge_into but its source is not a directory",
                entry.rel.display()
            )));
        }
        if entry.merge_into && entry.dst_kind != Some(FileKind::Directory) {
            return Err(Error::InvalidCallOrder(format!(
                "{} is marked merge_into but no directory exists at its destination",
                entry.rel.display()
            )));
        }
        if entry.whole_dir && entry.dst_kind == Some(FileKind::Directory) {
            return Err(Error::InvalidCallOrder(format!(
                "{} is marked whole_dir but a directory already exists at its destination",
                entry.rel.display()
            )));
        }
    }
    Ok(())
}

/// Remove every shadow `prepare::materialize` created for `entries`. Safe
/// to call on a `PreparedPlan` that was never merged; a no-op for any
/// entry whose shadow was already consumed or never existed
/// (`merge_into` entries have no shadow at all).
pub fn rollback(entries: &[PlanEntry]) -> Result<()> {
    validate_filelist(entries)?;
    for entry in entries {
        if entry.merge_into {
            continue;
        }
        match fs::symlink_metadata(&entry.src) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&entry.src).map_err(|e| Error::io("remove_dir_all", entry.src.clone(), e))?;
            }
            Ok(_) => {
                fs::remove_file(&entry.src).map_err(|e| Error::io("remove_file", entry.src.clone(), e))?;
            }
            Err(_) => {
                debug!(path = %entry.src.display(), "shadow already gone, nothing to roll back");
            }
        }
    }
    Ok(())
}

/// Idempotently re-issue the renames `rename::execute` would have
/// performed for `entries`/`planned_strays`, skipping any step whose
/// source path no longer exists (evidence it already completed before the
/// interruption). Returns the moves actually performed on *this* call —
/// an empty list means the prior run had already finished.
pub fn replay(entries: &[PlanEntry], planned_strays: &MoveList) -> Result<MoveList> {
    validate_filelist(entries)?;
    for (orig_rel, _) in planned_strays {
        if !entries.iter().any(|e| &e.rel == orig_rel) {
            return Err(Error::InvalidCallOrder(format!(
                "planned stray move for {} does not match any entry in the filelist",
                orig_rel.display()
            )));
        }
    }

    let mut performed = MoveList::new();

    for entry in entries {
        if let Some((orig_rel, stray_rel)) = planned_strays.iter().find(|(orig, _)| *orig == entry.rel) {
            let stray_abs = stray_sibling(&entry.dst);
            if rename_if_present(&entry.dst, &stray_abs)? {
                performed.push((orig_rel.clone(), stray_rel.clone()));
            }
        }

        if entry.merge_into {
            continue;
        }

        rename_if_present(&entry.src, &entry.dst)?;
    }

    Ok(performed)
}

fn rename_if_present(from: &Path, to: &Path) -> Result<bool> {
    match fs::symlink_metadata(from) {
        Ok(_) => {
            fs::rename(from, to).map_err(|e| Error::io("rename", to.to_path_buf(), e))?;
            Ok(true)
        }
        Err(_) => {
            warn!(from = %from.display(), to = %to.display(), "replay: source already gone, assuming completed");
            Ok(false)
        }
    }
}
