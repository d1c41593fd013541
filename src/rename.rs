// src/rename.rs

//! Rename executor (component F, spec §4.F) — MERGE itself.
//!
//! Every shadow produced by PREPARE lives as a `.MERGING-` sibling in the
//! same directory as its destination (see `model::shadow_sibling`), so the
//! renames this module issues are always same-directory, same-device, and
//! therefore atomic single syscalls — there is no cross-device fallback to
//! consider here, unlike a cross-device move, which has to cope
//! with an arbitrary source device.
//!
//! Order matters: a type-mismatched entry's stray rename must land before
//! its own real rename vacates the spot the stray sidelines, so each plan
//! entry's stray move (if any) is issued immediately ahead of that entry's
//! rename rather than all strays up front.

use crate::error::{Error, Result};
use crate::model::{stray_sibling, MoveList, PlanEntry};
use crate::progress::{Progress, ProgressEvent};
use std::fs;
use tracing::info;

/// Execute the ordered rename list for `entries`, given the stray moves
/// `stray::plan_strays` computed for the same entries (both keyed by
/// `PlanEntry::rel`). Returns the `MoveList` actually performed, in
/// execution order and in the same `(rel, stray_rel)` shape, for the caller
/// to hand to an external package database (§3) or to `recovery::replay` if
/// interrupted partway through.
pub fn execute(
    entries: &[PlanEntry],
    planned_strays: &MoveList,
    progress: &mut Progress<'_>,
) -> Result<MoveList> {
    let mut performed = MoveList::new();

    for entry in entries {
        if let Some((orig_rel, stray_rel)) = planned_strays.iter().find(|(orig, _)| *orig == entry.rel) {
            let stray_abs = stray_sibling(&entry.dst);
            rename(&entry.dst, &stray_abs)?;
            progress.emit(ProgressEvent::Move {
                original: entry.dst.clone(),
                stray: stray_abs,
            });
            performed.push((orig_rel.clone(), stray_rel.clone()));
        }

        if entry.merge_into {
            continue;
        }

        rename(&entry.src, &entry.dst)?;
        info!(rel = %entry.rel.display(), "merged");
    }

    Ok(performed)
}

fn rename(from: &std::path::Path, to: &std::path::Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::io("rename", to.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check;
    use crate::progress::Progress;
    use crate::shadow;
    use crate::stray::plan_strays;
    use std::fs;
    use tempfile::TempDir;

    fn prepared_entries(image: &std::path::Path, root: &std::path::Path) -> Vec<PlanEntry> {
        let (_, plan, groups) = check(image, root, None).unwrap();
        let mut progress = Progress::silent();
        shadow::materialize(plan.entries, &groups, &mut progress).unwrap()
    }

    #[test]
    fn merges_fresh_whole_dir() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("usr/bin")).unwrap();
        fs::write(image.path().join("usr/bin/foo"), b"bin").unwrap();

        let entries = prepared_entries(image.path(), root.path());
        let strays = plan_strays(&entries);
        let mut progress = Progress::silent();
        let moved = execute(&entries, &strays, &mut progress).unwrap();

        assert!(moved.is_empty());
        assert_eq!(fs::read(root.path().join("usr/bin/foo")).unwrap(), b"bin");
        assert!(fs::symlink_metadata(root.path().join(".MERGING-usr")).is_err());
    }

    #[test]
    fn merge_into_directory_does_not_rename() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("etc")).unwrap();
        fs::write(image.path().join("etc/app.conf"), b"new").unwrap();
        fs::create_dir_all(root.path().join("etc")).unwrap();

        let entries = prepared_entries(image.path(), root.path());
        let strays = plan_strays(&entries);
        let mut progress = Progress::silent();
        execute(&entries, &strays, &mut progress).unwrap();

        assert_eq!(fs::read(root.path().join("etc/app.conf")).unwrap(), b"new");
    }

    #[test]
    fn type_mismatch_sidelines_original_before_rename() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("var/log")).unwrap();
        fs::create_dir_all(root.path().join("var")).unwrap();
        fs::write(root.path().join("var/log"), b"old file").unwrap();

        let entries = prepared_entries(image.path(), root.path());
        let strays = plan_strays(&entries);
        let mut progress = Progress::silent();
        let moved = execute(&entries, &strays, &mut progress).unwrap();

        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0], (std::path::PathBuf::from("var/log"), std::path::PathBuf::from("var/.STRAY-log")));
        assert!(fs::metadata(root.path().join("var/log")).unwrap().is_dir());
        assert_eq!(fs::read(root.path().join("var/.STRAY-log")).unwrap(), b"old file");
    }
}
