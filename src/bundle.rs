//! Layout of a published grounding release: the paper, its supplement,
//! the parallel corpora and the model code.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry {
    pub path: &'static str,
    pub kind: EntryKind,
    pub description: &'static str,
}

const ENTRIES: [LayoutEntry; 4] = [
    LayoutEntry {
        path: "paper.pdf",
        kind: EntryKind::File,
        description: "published paper",
    },
    LayoutEntry {
        path: "supplemental.pdf",
        kind: EntryKind::File,
        description: "supplemental material",
    },
    LayoutEntry {
        path: "data",
        kind: EntryKind::Dir,
        description: "parallel corpora of commands and reward function strings",
    },
    LayoutEntry {
        path: "code",
        kind: EntryKind::Dir,
        description: "grounding model code",
    },
];

pub struct ReleaseLayout {
    root: PathBuf,
}

impl ReleaseLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn entries() -> &'static [LayoutEntry] {
        &ENTRIES
    }

    /// Entries that are absent, or present with the wrong kind.
    pub fn verify(&self) -> Vec<LayoutEntry> {
        Self::entries()
            .iter()
            .filter(|entry| {
                let path = self.root.join(entry.path);
                match entry.kind {
                    EntryKind::File => !path.is_file(),
                    EntryKind::Dir => !path.is_dir(),
                }
            })
            .copied()
            .collect()
    }
}
