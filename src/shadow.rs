// src/shadow.rs

//! Shadow materializer (component D, spec §4.D) — the bulk of PREPARE.
//!
//! For every `PlanEntry` that will need a rename, produce a `.MERGING-`
//! sibling of the destination holding a faithful copy of the source entry,
//! then repoint `PlanEntry::src` at that shadow. A `merge_into` directory
//! entry needs no shadow at all (§3: it never gets renamed); a `whole_dir`
//! entry's entire subtree is materialized as a single recursive copy rooted
//! at one shadow directory, since spec §4.C notes the implementation always
//! materializes a shadow rather than attempting a same-device direct rename.

use crate::error::{Error, Result};
use crate::hardlink::{HardlinkGroups, MaterializedInodes};
use crate::model::{shadow_sibling, FileKind, PlanEntry, StatSnapshot};
use crate::progress::{Progress, ProgressEvent};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::unistd::mkfifo;
use std::fs;
use std::os::unix::fs::{symlink, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Materialize shadows for every entry in `entries` that needs one,
/// repointing `PlanEntry::src` at the shadow path it produced.
///
/// `entries` is consumed and returned so the caller (`installer::Plan`)
/// can move straight from "raw plan" to "prepared plan" without an
/// intermediate borrow.
pub fn materialize(
    mut entries: Vec<PlanEntry>,
    groups: &HardlinkGroups,
    progress: &mut Progress<'_>,
) -> Result<Vec<PlanEntry>> {
    let mut materialized = MaterializedInodes::default();

    for entry in &mut entries {
        if entry.merge_into {
            continue;
        }

        remove_stale_shadow(&entry.dst)?;
        let shadow = shadow_sibling(&entry.dst);

        if entry.whole_dir {
            materialize_whole_dir(&entry.rel, &entry.src, &shadow, groups, &mut materialized, progress)?;
            // The top directory itself is never a symlink (whole_dir only
            // applies to directory entries), so it always reports Install;
            // descendants report their own events from materialize_one.
            progress.emit(ProgressEvent::Install {
                rel: entry.rel.clone(),
            });
        } else {
            materialize_one(&entry.rel, &entry.src, &shadow, &entry.src_stat, groups, &mut materialized, progress)?;
        }

        debug!(rel = %entry.rel.display(), shadow = %shadow.display(), "materialized shadow");
        entry.src = shadow;
    }

    Ok(entries)
}

/// A `.MERGING-` path left behind by an interrupted prior PREPARE is owned
/// by this crate and safe to discard unconditionally (§6).
fn remove_stale_shadow(dst: &Path) -> Result<()> {
    let shadow = shadow_sibling(dst);
    match fs::symlink_metadata(&shadow) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&shadow).map_err(|e| Error::io("remove_dir_all", shadow, e)),
        Ok(_) => fs::remove_file(&shadow).map_err(|e| Error::io("remove_file", shadow, e)),
        Err(_) => Ok(()),
    }
}

fn materialize_whole_dir(
    entry_rel: &Path,
    src_root: &Path,
    shadow_root: &Path,
    groups: &HardlinkGroups,
    materialized: &mut MaterializedInodes,
    progress: &mut Progress<'_>,
) -> Result<()> {
    fs::create_dir(shadow_root).map_err(|e| Error::io("mkdir", shadow_root, e))?;
    copy_metadata(src_root, shadow_root)?;
    materialize_dir_contents(entry_rel, src_root, shadow_root, groups, materialized, progress)
}

/// Recurse into `src_dir`'s children in sorted name order, descending into
/// each subdirectory completely before moving on to its next sibling — the
/// same pre-order, depth-first, sorted traversal `walk::walk_image` (and
/// therefore `hardlink::HardlinkGroups::build`) produces. A level-by-level
/// stack would instead finish visiting every sibling's *own* children before
/// backtracking into the first sibling's grandchildren, which can place a
/// hardlink follower ahead of its representative whenever the group
/// straddles two sibling subdirectories; matching the walk order exactly
/// avoids that.
fn materialize_dir_contents(
    rel_dir: &Path,
    src_dir: &Path,
    shadow_dir: &Path,
    groups: &HardlinkGroups,
    materialized: &mut MaterializedInodes,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let mut children: Vec<_> = fs::read_dir(src_dir)
        .map_err(|e| Error::io("read_dir", src_dir.to_path_buf(), e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io("read_dir", src_dir.to_path_buf(), e))?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let child_src = child.path();
        let child_shadow = shadow_dir.join(child.file_name());
        let child_rel = rel_dir.join(child.file_name());
        let meta = fs::symlink_metadata(&child_src)
            .map_err(|e| Error::io("lstat", child_src.clone(), e))?;
        let kind = FileKind::from_mode(meta.mode()).ok_or_else(|| Error::UnsupportedKind {
            phase: "prepare",
            path: child_src.clone(),
        })?;

        if kind == FileKind::Directory {
            fs::create_dir(&child_shadow).map_err(|e| Error::io("mkdir", child_shadow.clone(), e))?;
            copy_metadata(&child_src, &child_shadow)?;
            materialize_dir_contents(&child_rel, &child_src, &child_shadow, groups, materialized, progress)?;
        } else {
            let stat = to_snapshot(&meta, kind);
            materialize_one(&child_rel, &child_src, &child_shadow, &stat, groups, materialized, progress)?;
        }
    }
    Ok(())
}

/// Materialize one non-directory entry, following the hardlink-follower
/// rule when applicable (§4.C): the group representative is copied/created
/// normally; every other member is `link()`ed against the representative's
/// shadow.
fn materialize_one(
    rel: &Path,
    src: &Path,
    shadow: &Path,
    stat: &StatSnapshot,
    groups: &HardlinkGroups,
    materialized: &mut MaterializedInodes,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let key = (stat.dev, stat.ino);

    if groups.group_for(stat).is_some() && !groups.is_representative(rel, stat) {
        if let Some(rep_shadow) = materialized.shadow_path_for(key) {
            fs::hard_link(rep_shadow, shadow).map_err(|e| Error::io("link", shadow.to_path_buf(), e))?;
            progress.emit(ProgressEvent::Install { rel: rel.to_path_buf() });
            return Ok(());
        }
        // The representative is always visited before any follower, since
        // both top-level entries and whole-dir subtrees are materialized in
        // the same sorted, depth-first order `HardlinkGroups::build` used;
        // this fallback is a defensive guard against that invariant, not a
        // path expected to trigger.
    }

    match stat.kind {
        FileKind::Regular => {
            fs::copy(src, shadow).map_err(|e| Error::io("copy", shadow.to_path_buf(), e))?;
            copy_metadata(src, shadow)?;
            progress.emit(ProgressEvent::Install { rel: rel.to_path_buf() });
        }
        FileKind::Symlink => {
            let target = fs::read_link(src).map_err(|e| Error::io("readlink", src.to_path_buf(), e))?;
            symlink(&target, shadow).map_err(|e| Error::io("symlink", shadow.to_path_buf(), e))?;
            // Symlink mode bits aren't meaningful on Linux and ownership
            // needs lchown, not chmod; only the link target matters here.
            progress.emit(ProgressEvent::Link {
                rel: rel.to_path_buf(),
                target,
            });
        }
        FileKind::Fifo => {
            mkfifo(shadow, Mode::from_bits_truncate(stat.mode)).map_err(|e| nix_err("mkfifo", shadow, e))?;
            copy_metadata(src, shadow)?;
            progress.emit(ProgressEvent::Install { rel: rel.to_path_buf() });
        }
        FileKind::BlockDev | FileKind::CharDev => {
            let sflag = if stat.kind == FileKind::BlockDev { SFlag::S_IFBLK } else { SFlag::S_IFCHR };
            mknod(
                shadow,
                sflag,
                Mode::from_bits_truncate(stat.mode),
                stat.rdev,
            )
            .map_err(|e| nix_err("mknod", shadow, e))?;
            copy_metadata(src, shadow)?;
            progress.emit(ProgressEvent::Install { rel: rel.to_path_buf() });
        }
        FileKind::Directory | FileKind::Socket => {
            return Err(Error::UnsupportedKind {
                phase: "prepare",
                path: src.to_path_buf(),
            });
        }
    }

    materialized.record(key, shadow.to_path_buf());
    Ok(())
}

fn copy_metadata(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|e| Error::io("lstat", src.to_path_buf(), e))?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let perms = fs::Permissions::from_mode(meta.mode() & 0o7777);
    fs::set_permissions(dst, perms).map_err(|e| Error::io("chmod", dst.to_path_buf(), e))?;

    let uid = nix::unistd::Uid::from_raw(meta.uid());
    let gid = nix::unistd::Gid::from_raw(meta.gid());
    if let Err(e) = nix::unistd::chown(dst, Some(uid), Some(gid)) {
        // Non-root callers can't chown; this is expected in test
        // environments and is not fatal to the merge itself.
        warn!(path = %dst.display(), error = %e, "could not preserve ownership");
    }

    let _ = nix::sys::stat::utimensat(
        None::<std::os::fd::BorrowedFd>,
        dst,
        &nix::sys::time::TimeSpec::new(meta.atime(), 0),
        &nix::sys::time::TimeSpec::new(meta.mtime(), 0),
        nix::sys::stat::UtimensatFlags::NoFollowSymlink,
    );
    Ok(())
}

fn to_snapshot(meta: &fs::Metadata, kind: FileKind) -> StatSnapshot {
    StatSnapshot {
        kind,
        dev: meta.dev(),
        ino: meta.ino(),
        nlink: meta.nlink(),
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.mtime(),
        atime: meta.atime(),
        rdev: if matches!(kind, FileKind::BlockDev | FileKind::CharDev) {
            meta.rdev()
        } else {
            0
        },
    }
}

fn nix_err(op: &'static str, path: &Path, err: nix::Error) -> Error {
    Error::io(op, path.to_path_buf(), std::io::Error::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use std::fs;
    use tempfile::TempDir;

    fn plan_entries(image: &Path, root: &Path) -> (Vec<PlanEntry>, HardlinkGroups) {
        let (_, plan, groups) = crate::check::check(image, root, None).unwrap();
        (plan.entries, groups)
    }

    #[test]
    fn materializes_regular_file_shadow() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(image.path().join("a"), b"hello").unwrap();

        let (entries, groups) = plan_entries(image.path(), root.path());
        let mut progress = Progress::silent();

        let prepared = materialize(entries, &groups, &mut progress).unwrap();
        let entry = &prepared[0];
        assert!(entry.src.to_string_lossy().contains(".MERGING-a"));
        assert_eq!(fs::read(&entry.src).unwrap(), b"hello");
    }

    #[test]
    fn materializes_whole_dir_subtree_recursively() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("usr/bin")).unwrap();
        fs::write(image.path().join("usr/bin/foo"), b"bin").unwrap();

        let (entries, groups) = plan_entries(image.path(), root.path());
        let mut progress = Progress::silent();

        let prepared = materialize(entries, &groups, &mut progress).unwrap();
        let usr = &prepared[0];
        assert!(usr.whole_dir);
        let shadow_foo = usr.src.join("bin/foo");
        assert_eq!(fs::read(&shadow_foo).unwrap(), b"bin");
    }

    #[test]
    fn merge_into_directory_gets_no_shadow() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("etc")).unwrap();
        fs::create_dir_all(root.path().join("etc")).unwrap();

        let (entries, groups) = plan_entries(image.path(), root.path());
        let mut progress = Progress::silent();

        let prepared = materialize(entries, &groups, &mut progress).unwrap();
        let etc = &prepared[0];
        assert_eq!(etc.src, image.path().join("etc"));
        assert!(fs::symlink_metadata(root.path().join("etc/.MERGING-etc")).is_err());
    }

    #[test]
    fn hardlink_follower_links_against_representative_shadow() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(image.path().join("x"), b"shared").unwrap();
        fs::hard_link(image.path().join("x"), image.path().join("y")).unwrap();

        let (entries, groups) = plan_entries(image.path(), root.path());
        let mut progress = Progress::silent();

        let prepared = materialize(entries, &groups, &mut progress).unwrap();
        let x = prepared.iter().find(|e| e.rel == PathBuf::from("x")).unwrap();
        let y = prepared.iter().find(|e| e.rel == PathBuf::from("y")).unwrap();
        let x_meta = fs::metadata(&x.src).unwrap();
        let y_meta = fs::metadata(&y.src).unwrap();
        assert_eq!(x_meta.ino(), y_meta.ino());
    }

    #[test]
    fn hardlink_group_across_sibling_whole_dir_subdirectories_preserves_link() {
        // usr/bin and usr/lib are sibling subdirectories visited while
        // recursing the single whole-dir entry "usr"; "bin" sorts before
        // "lib", so usr/bin/foo is the representative and usr/lib/foo must
        // land as a hard link against it, not an independent copy.
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("usr/bin")).unwrap();
        fs::create_dir_all(image.path().join("usr/lib")).unwrap();
        fs::write(image.path().join("usr/bin/foo"), b"shared").unwrap();
        fs::hard_link(image.path().join("usr/bin/foo"), image.path().join("usr/lib/foo")).unwrap();

        let (entries, groups) = plan_entries(image.path(), root.path());
        let mut progress = Progress::silent();

        let prepared = materialize(entries, &groups, &mut progress).unwrap();
        let usr = &prepared[0];
        assert!(usr.whole_dir);
        let bin_foo = usr.src.join("bin/foo");
        let lib_foo = usr.src.join("lib/foo");
        let bin_meta = fs::metadata(&bin_foo).unwrap();
        let lib_meta = fs::metadata(&lib_foo).unwrap();
        assert_eq!(bin_meta.ino(), lib_meta.ino());
        assert_eq!(bin_meta.nlink(), 2);
    }

    #[test]
    fn symlink_entry_emits_link_progress_event_with_target() {
        let image = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(image.path().join("real"), b"x").unwrap();
        std::os::unix::fs::symlink("real", image.path().join("link")).unwrap();

        let (entries, groups) = plan_entries(image.path(), root.path());
        let mut events = Vec::new();
        let mut record = |event: ProgressEvent| events.push(event);
        let mut progress = Progress::new(&mut record);

        materialize(entries, &groups, &mut progress).unwrap();
        let target = events.iter().find_map(|e| match e {
            ProgressEvent::Link { rel, target } if rel == Path::new("link") => Some(target.clone()),
            _ => None,
        });
        assert_eq!(target, Some(PathBuf::from("real")));
    }
}
