// src/hardlink.rs

//! Hardlink group tracker (component C, spec §4.C, §3).
//!
//! Groups image entries by source inode so that PREPARE can recreate
//! hardlink topology across the copy boundary: the first entry seen for a
//! given inode is materialized normally (the *representative*); every
//! other entry sharing that inode is materialized as `link(representative,
//! self)`.
//!
//! Groups are built across every non-directory node the walker produced —
//! including ones that end up suppressed inside a whole-dir subtree (see
//! `check::Plan`) — because a hardlink pair can legally straddle a
//! whole-dir boundary (e.g. `usr/bin/foo` and `etc/foo` linked together,
//! where `usr` is a fresh whole-dir and `etc` already exists). Scoping
//! groups to only the top-level plan entries would silently break that
//! case; spec §4.C is silent on it, so this generalizes it in the obvious
//! direction.

use crate::model::HardlinkGroup;
use crate::walk::ImageNode;
use std::collections::HashMap;
use std::path::PathBuf;

/// Key identifying a source inode: `(device, inode)`.
pub type InodeKey = (u64, u64);

/// All hardlink groups found in the image, keyed by source inode.
#[derive(Debug, Default)]
pub struct HardlinkGroups {
    groups: HashMap<InodeKey, HardlinkGroup>,
}

impl HardlinkGroups {
    /// Build groups from every non-directory, classification-successful,
    /// non-socket node in walk order.
    pub fn build(nodes: &[ImageNode]) -> Self {
        let mut groups: HashMap<InodeKey, HardlinkGroup> = HashMap::new();

        for node in nodes {
            let Some(kind) = node.src_kind else { continue };
            if kind == crate::model::FileKind::Directory || kind == crate::model::FileKind::Socket {
                continue;
            }
            let stat = node.src_stat();
            if stat.nlink <= 1 {
                continue;
            }
            let key = (stat.dev, stat.ino);
            let entry = groups.entry(key).or_insert_with(|| HardlinkGroup {
                members: Vec::new(),
                on_disk_link_count: stat.nlink,
            });
            entry.members.push(node.rel.clone());
        }

        // Singletons (an inode whose only in-image appearance has nlink > 1
        // because of links outside the image) still need an entry so
        // `has_external_links` reports correctly, but a group of size 1
        // behaves identically to "no group" for materialization purposes.
        groups.retain(|_, g| !g.members.is_empty());

        Self { groups }
    }

    pub fn group_for(&self, stat: &crate::model::StatSnapshot) -> Option<&HardlinkGroup> {
        self.groups.get(&(stat.dev, stat.ino))
    }

    pub fn is_representative(&self, rel: &std::path::Path, stat: &crate::model::StatSnapshot) -> bool {
        match self.group_for(stat) {
            Some(group) => group.is_representative(rel),
            None => true,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InodeKey, &HardlinkGroup)> {
        self.groups.iter()
    }
}

/// Tracks, during PREPARE, the shadow path each already-materialized inode
/// landed at, so followers can `link()` against their representative.
#[derive(Debug, Default)]
pub struct MaterializedInodes {
    shadow_paths: HashMap<InodeKey, PathBuf>,
}

impl MaterializedInodes {
    pub fn record(&mut self, key: InodeKey, shadow_path: PathBuf) {
        self.shadow_paths.insert(key, shadow_path);
    }

    pub fn shadow_path_for(&self, key: InodeKey) -> Option<&PathBuf> {
        self.shadow_paths.get(&key)
    }
}
