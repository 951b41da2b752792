//! Git repository access for history mining
//!
//! Walks the commit graph from a branch tip, lists the files of each commit's
//! tree and reads blob contents.

/// Iterative topological ordering of the commit graph
pub mod topo;
/// Tree listing and file selection
pub mod tree;
/// Repository opening, branch resolution and history walking
pub mod walker;

pub use tree::{FileFilter, TreeEntry, list_commit_files, read_blob_text};
pub use walker::{History, HistoryWalker};
