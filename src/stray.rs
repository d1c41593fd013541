// src/stray.rs

//! Stray-rename planner (component E, spec §4.E).
//!
//! For every `PlanEntry` whose destination already exists as a different
//! kind than the source, the existing destination must be sidelined to a
//! `.STRAY-<basename>` sibling before the real rename can land — `rename()`
//! cannot atomically replace a directory with a non-directory or vice
//! versa. This module turns that observation into an ordered list of
//! `(original_rel, stray_rel)` pairs, one per affected entry, to run
//! immediately before that entry's real rename in `rename::execute`.

use crate::model::{stray_sibling, MoveList, PlanEntry};

/// Build the `MoveList` for `entries`: one `(rel, stray_sibling(rel))` pair,
/// both relative to the image/destination roots, for each entry whose
/// destination exists with a kind that doesn't match the source, in plan
/// order (which is walk order, so a parent's stray rename is always planned
/// before any of its children could be reached — though in practice a
/// type-mismatched directory is always `whole_dir`, so it has no plan
/// children to begin with).
pub fn plan_strays(entries: &[PlanEntry]) -> MoveList {
    entries
        .iter()
        .filter_map(|entry| {
            let dst_kind = entry.dst_kind?;
            if dst_kind.matches(entry.src_kind) {
                return None;
            }
            Some((entry.rel.clone(), stray_sibling(&entry.rel)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn plans_stray_for_type_mismatch() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("var/log")).unwrap();
        fs::create_dir_all(root.path().join("var")).unwrap();
        fs::write(root.path().join("var/log"), b"old").unwrap();

        let (_, plan, _groups) = check(image.path(), root.path(), None).unwrap();
        let moves = plan_strays(&plan.entries);

        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].0, std::path::PathBuf::from("var/log"));
        assert_eq!(moves[0].1, std::path::PathBuf::from("var/.STRAY-log"));
    }

    #[test]
    fn no_stray_for_matching_kinds() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(image.path().join("a"), b"new").unwrap();
        fs::write(root.path().join("a"), b"old").unwrap();

        let (_, plan, _groups) = check(image.path(), root.path(), None).unwrap();
        assert!(plan_strays(&plan.entries).is_empty());
    }

    #[test]
    fn no_stray_for_fresh_destination() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(image.path().join("a"), b"new").unwrap();

        let (_, plan, _groups) = check(image.path(), root.path(), None).unwrap();
        assert!(plan_strays(&plan.entries).is_empty());
    }
}
