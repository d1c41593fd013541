// src/walk.rs

//! Image walker & classifier (component A, spec §4.A).
//!
//! Walks the image tree top-down in sorted sibling order (the order §4.F's
//! rename list depends on) and, for each entry, pairs it with the
//! corresponding destination path on the root filesystem.

use crate::error::{Error, Result};
use crate::model::{FileKind, StatSnapshot};
use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// One image filesystem node paired with its destination counterpart.
///
/// `src_kind` is `None` when the entry's mode doesn't map to any
/// [`FileKind`] variant — the caller reports this as `notsupported` per
/// §4.A point 3 and does not recurse further into it (it has no children to
/// recurse into in that case: only regular files, FIFOs, device nodes and
/// sockets can fail classification, and none of those are directories).
pub struct ImageNode {
    pub rel: PathBuf,
    pub src_path: PathBuf,
    pub dst_path: PathBuf,
    pub src_kind: Option<FileKind>,
    pub src_meta: Metadata,
    pub dst_kind: Option<FileKind>,
    pub dst_meta: Option<Metadata>,
    pub dst_first_existing_ancestor: Option<PathBuf>,
}

impl ImageNode {
    pub fn src_stat(&self) -> StatSnapshot {
        to_snapshot(&self.src_meta, self.src_kind.unwrap_or(FileKind::Regular))
    }

    pub fn dst_stat(&self) -> Option<StatSnapshot> {
        let kind = self.dst_kind?;
        self.dst_meta.as_ref().map(|m| to_snapshot(m, kind))
    }
}

fn to_snapshot(meta: &Metadata, kind: FileKind) -> StatSnapshot {
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

/// Walk `image` top-down in sorted sibling order, pairing every entry with
/// its destination counterpart under `root`.
///
/// Returns `FilesystemChanged` if an image entry that was just yielded by
/// the directory iterator can no longer be `lstat`'d — evidence that the
/// image is being mutated concurrently with CHECK (§5 assumes a quiescent
/// image; this is the one thing CHECK actively detects rather than merely
/// assuming).
pub fn walk_image(image: &Path, root: &Path) -> Result<Vec<ImageNode>> {
    let mut nodes = Vec::new();

    let walker = WalkDir::new(image)
        .min_depth(1)
        .sort_by_file_name()
        .follow_links(false);

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| image.to_path_buf());
            Error::FilesystemChanged { path }
        })?;

        let src_path = entry.path().to_path_buf();
        let rel = src_path
            .strip_prefix(image)
            .expect("walkdir yields paths under its root")
            .to_path_buf();
        let dst_path = root.join(&rel);

        let src_meta = fs::symlink_metadata(&src_path)
            .map_err(|_| Error::FilesystemChanged { path: src_path.clone() })?;
        let src_kind = FileKind::from_mode(src_meta.mode());

        let (dst_kind, dst_meta, dst_first_existing_ancestor) = match fs::symlink_metadata(&dst_path) {
            Ok(meta) => {
                let kind = FileKind::from_mode(meta.mode());
                (kind, Some(meta), None)
            }
            Err(_) => {
                let ancestor = first_existing_ancestor(dst_path.parent().unwrap_or(root))?;
                (None, None, Some(ancestor))
            }
        };

        debug!(rel = %rel.display(), src_kind = ?src_kind, dst_kind = ?dst_kind, "walked image entry");

        nodes.push(ImageNode {
            rel,
            src_path,
            dst_path,
            src_kind,
            src_meta,
            dst_kind,
            dst_meta,
            dst_first_existing_ancestor,
        });
    }

    Ok(nodes)
}

/// Walk up from `start` until an existing ancestor is found. A destination
/// that doesn't exist at all bottoms out at the filesystem root, which must
/// exist; if even that lookup fails the underlying error is propagated
/// (spec §4.A point 4).
fn first_existing_ancestor(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        match fs::symlink_metadata(&current) {
            Ok(_) => return Ok(current),
            Err(e) => match current.parent() {
                Some(parent) if parent != current => current = parent.to_path_buf(),
                _ => {
                    return Err(Error::io("lstat", current, e));
                }
            },
        }
    }
}
