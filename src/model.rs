// src/model.rs

//! Data model for the atomic installer core.
//!
//! Types here are the ones named throughout: `FileKind`,
//! `StatSnapshot`, `PlanEntry`, `HardlinkGroup`, `CheckReport`, `MoveList`.
//! They are plain data — the logic that builds and consumes them lives in
//! `walk`, `check`, `hardlink`, `shadow`, `stray`, `rename` and `recovery`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Reserved-prefix namespace owned exclusively by this crate (§6).
///
/// Anything under `.MERGING-*` may be removed by the installer at any time;
/// `.STRAY-*` entries are preserved across phases and surfaced via the
/// `MoveList`.
pub const MERGING_PREFIX: &str = ".MERGING-";
/// See [`MERGING_PREFIX`].
pub const STRAY_PREFIX: &str = ".STRAY-";

/// Returns true if `name` (a bare filename, not a path) starts with either
/// reserved prefix.
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(MERGING_PREFIX) || name.starts_with(STRAY_PREFIX)
}

/// The shadow path for `dst` — `parent(dst)/.MERGING-basename(dst)`.
pub fn shadow_sibling(dst: &Path) -> PathBuf {
    reserved_sibling(dst, MERGING_PREFIX)
}

/// The stray path for `dst` — `parent(dst)/.STRAY-basename(dst)`.
pub fn stray_sibling(dst: &Path) -> PathBuf {
    reserved_sibling(dst, STRAY_PREFIX)
}

fn reserved_sibling(path: &Path, prefix: &str) -> PathBuf {
    let name = path
        .file_name()
        .expect("reserved_sibling called on a path with no filename")
        .to_string_lossy();
    let sibling_name = format!("{prefix}{name}");
    match path.parent() {
        Some(parent) => parent.join(sibling_name),
        None => PathBuf::from(sibling_name),
    }
}

/// Kind of a filesystem entry, as derived from an `lstat` mode. Symlinks are
/// never followed anywhere in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Fifo,
    BlockDev,
    CharDev,
    Socket,
}

impl FileKind {
    /// Classify a raw `st_mode`. Returns `None` for a mode this crate has no
    /// variant for (the caller reports this as `notsupported`).
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & libc::S_IFMT {
            libc::S_IFREG => Some(Self::Regular),
            libc::S_IFDIR => Some(Self::Directory),
            libc::S_IFLNK => Some(Self::Symlink),
            libc::S_IFIFO => Some(Self::Fifo),
            libc::S_IFBLK => Some(Self::BlockDev),
            libc::S_IFCHR => Some(Self::CharDev),
            libc::S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    /// Whether two kinds are close enough to be considered "the same kind"
    /// for the purposes of the type-mismatch stray rule (§4.E). Every kind
    /// only matches itself — POSIX `rename` replacing a regular file with a
    /// regular file is fine; replacing a directory with a FIFO is not.
    pub fn matches(self, other: FileKind) -> bool {
        self == other
    }
}

/// The subset of an `lstat` result the core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub kind: FileKind,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub atime: i64,
    /// Populated only for `BlockDev`/`CharDev`; `0` otherwise.
    pub rdev: u64,
}

/// One scheduled operation, built during CHECK and mutated only during
/// PREPARE (`src` is re-pointed at the materialized shadow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Path relative to both the image root and the destination root.
    pub rel: PathBuf,
    /// Absolute path currently holding the content to rename from.
    pub src: PathBuf,
    /// Absolute destination path, `root/rel`.
    pub dst: PathBuf,
    pub src_kind: FileKind,
    pub src_stat: StatSnapshot,
    pub dst_kind: Option<FileKind>,
    pub dst_stat: Option<StatSnapshot>,
    /// First existing ancestor of `dst`, used for device-id comparison when
    /// `dst` itself doesn't exist.
    pub dst_first_existing_ancestor: Option<PathBuf>,
    /// True for a directory entry whose destination does not yet exist
    /// (§3: whole-dir entry) — its subtree is shadowed and renamed as a unit
    /// and its descendants are absent from the plan.
    pub whole_dir: bool,
    /// True for a directory entry whose destination already exists as a
    /// directory (§3: merge-into entry) — produces no rename, no shadow;
    /// only its children are scheduled.
    pub merge_into: bool,
}

impl PlanEntry {
    pub fn is_directory(&self) -> bool {
        self.src_kind == FileKind::Directory
    }
}

/// A group of image entries that share a single source inode (§3, §4.C).
/// Only non-directory entries are grouped — hardlinked directories are not
/// a thing POSIX allows.
#[derive(Debug, Clone, Default)]
pub struct HardlinkGroup {
    /// `rel` paths sharing this inode, in the order they were encountered
    /// while walking the image. The first entry is the representative.
    pub members: Vec<PathBuf>,
    /// `st_nlink` of the shared inode, as observed on the image filesystem.
    pub on_disk_link_count: u64,
}

impl HardlinkGroup {
    pub fn representative(&self) -> Option<&Path> {
        self.members.first().map(PathBuf::as_path)
    }

    pub fn is_representative(&self, rel: &Path) -> bool {
        self.members.len() == 1 || self.representative() == Some(rel)
    }

    /// True if the inode has links outside the image that must not follow
    /// the in-image entries when they move (§4.C).
    pub fn has_external_links(&self) -> bool {
        self.on_disk_link_count as usize > self.members.len()
    }
}

/// Category of problem recorded by CHECK (§3, §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProblemCategory {
    NotSupported,
    /// Reserved for an unsupported-kind image entry that would also replace
    /// an existing destination; the current rule set (mirroring
    /// `atomicinstall.py`) never populates this category because unsupported
    /// kinds are skipped before the destination is even inspected.
    NotSupportedReplace,
    Collision,
    Unacceptable,
    LeftoverStray,
}

/// Mapping from problem category to the offending `rel` paths. Empty
/// categories are present (§3) so a caller can distinguish "checked, clean"
/// from "never checked".
pub type CheckReport = BTreeMap<ProblemCategory, Vec<PathBuf>>;

/// Build an empty report with every category present.
pub fn empty_report() -> CheckReport {
    use ProblemCategory::*;
    let mut report = CheckReport::new();
    for category in [
        NotSupported,
        NotSupportedReplace,
        Collision,
        Unacceptable,
        LeftoverStray,
    ] {
        report.insert(category, Vec::new());
    }
    report
}

/// True if every category in the report is empty — the plan is viable.
pub fn report_is_clean(report: &CheckReport) -> bool {
    report.values().all(Vec::is_empty)
}

/// Stray renames performed during MERGE: `(original_rel, stray_rel)` pairs,
/// both relative to the image/destination roots like `PlanEntry::rel` — not
/// absolute paths — so an external package database can reattribute the
/// sidelined files (§3) using the same relative keys it already tracks.
pub type MoveList = Vec<(PathBuf, PathBuf)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_name_detection() {
        assert!(is_reserved_name(".MERGING-foo"));
        assert!(is_reserved_name(".STRAY-foo"));
        assert!(!is_reserved_name("foo"));
        assert!(!is_reserved_name(".foo"));
    }

    #[test]
    fn shadow_and_stray_siblings() {
        let dst = Path::new("/root/etc/app.conf");
        assert_eq!(
            shadow_sibling(dst),
            PathBuf::from("/root/etc/.MERGING-app.conf")
        );
        assert_eq!(
            stray_sibling(dst),
            PathBuf::from("/root/etc/.STRAY-app.conf")
        );
    }

    #[test]
    fn file_kind_from_mode() {
        assert_eq!(FileKind::from_mode(libc::S_IFREG | 0o644), Some(FileKind::Regular));
        assert_eq!(FileKind::from_mode(libc::S_IFDIR | 0o755), Some(FileKind::Directory));
        assert_eq!(FileKind::from_mode(libc::S_IFLNK | 0o777), Some(FileKind::Symlink));
        assert_eq!(FileKind::from_mode(libc::S_IFSOCK | 0o755), Some(FileKind::Socket));
    }

    #[test]
    fn hardlink_group_representative() {
        let mut group = HardlinkGroup {
            members: vec![PathBuf::from("x"), PathBuf::from("y")],
            on_disk_link_count: 2,
        };
        assert!(group.is_representative(Path::new("x")));
        assert!(!group.is_representative(Path::new("y")));
        assert!(!group.has_external_links());

        group.on_disk_link_count = 3;
        assert!(group.has_external_links());
    }

    #[test]
    fn empty_report_has_all_categories_and_is_clean() {
        let report = empty_report();
        assert_eq!(report.len(), 5);
        assert!(report_is_clean(&report));
    }
}
