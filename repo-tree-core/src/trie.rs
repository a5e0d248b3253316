//! Reconstructs a directory hierarchy from a flat listing.
//!
//! Every node is keyed by its full path (root label joined with its segments),
//! and that map lookup is what deduplicates nodes when several entries share a
//! prefix or a directory is listed explicitly. The walk is iterative over
//! segments, so input depth never grows the call stack.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::contract::ListingEntry;

/// One path segment's position in the reconstructed tree, or the synthetic root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    full_path: String,
    name: String,
    children: BTreeSet<String>,
    is_directory: bool,
}

impl HierarchyNode {
    fn new(full_path: String, name: String, is_directory: bool) -> Self {
        Self {
            full_path,
            name,
            children: BTreeSet::new(),
            is_directory,
        }
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// The segment name; for the root this is the root label.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Immediate child segment names, in ascending lexicographic order.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.children.iter().map(String::as_str)
    }

    /// Full path of the child called `segment`.
    pub fn child_path(&self, segment: &str) -> String {
        join_path(&self.full_path, segment)
    }
}

/// The reconstructed tree: a root plus an index of every node by full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    root_label: String,
    nodes: HashMap<String, HierarchyNode>,
}

impl Hierarchy {
    pub fn root_label(&self) -> &str {
        &self.root_label
    }

    pub fn root(&self) -> &HierarchyNode {
        // The root is inserted on construction and never removed.
        &self.nodes[&self.root_label]
    }

    pub fn get(&self, full_path: &str) -> Option<&HierarchyNode> {
        self.nodes.get(full_path)
    }

    /// Number of nodes, excluding the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.nodes.values()
    }
}

fn join_path(parent: &str, segment: &str) -> String {
    let mut path = String::with_capacity(parent.len() + 1 + segment.len());
    path.push_str(parent);
    path.push('/');
    path.push_str(segment);
    path
}

/// Build the hierarchy for `entries` under a root named `root_label`.
///
/// Ancestors that only appear implicitly (as a prefix of a deeper path) are
/// created as directories. A node is upgraded to a directory the first time it
/// is seen as an intermediate segment or as a `tree` entry and never goes back,
/// which makes the result independent of entry order. Empty segments
/// (`a//b`, trailing `/`) are ignored.
pub fn build(entries: &[ListingEntry], root_label: &str) -> Hierarchy {
    let mut nodes: HashMap<String, HierarchyNode> = HashMap::new();
    nodes.insert(
        root_label.to_string(),
        HierarchyNode::new(root_label.to_string(), root_label.to_string(), true),
    );

    for entry in entries {
        let segments: Vec<&str> = entry.path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = root_label.to_string();

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            let is_directory = !is_last || entry.kind.is_tree();
            let child_path = join_path(&current, segment);

            nodes
                .entry(child_path.clone())
                .and_modify(|node| node.is_directory |= is_directory)
                .or_insert_with(|| {
                    HierarchyNode::new(child_path.clone(), segment.to_string(), is_directory)
                });

            if let Some(parent) = nodes.get_mut(&current) {
                parent.children.insert(segment.to_string());
            }
            current = child_path;
        }
    }

    debug!(
        root = root_label,
        entries = entries.len(),
        nodes = nodes.len() - 1,
        "Built hierarchy from listing"
    );

    Hierarchy {
        root_label: root_label.to_string(),
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn children(h: &Hierarchy, path: &str) -> Vec<String> {
        h.get(path)
            .expect("node exists")
            .children()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn empty_listing_yields_only_root() {
        let h = build(&[], "R");
        assert!(h.is_empty());
        assert!(h.root().is_directory());
        assert_eq!(h.root().name(), "R");
        assert_eq!(h.root().children().len(), 0);
    }

    #[test]
    fn single_segment_is_child_of_root() {
        let h = build(&[ListingEntry::blob("README.md")], "R");
        assert_eq!(children(&h, "R"), vec!["README.md"]);
        assert!(!h.get("R/README.md").unwrap().is_directory());
    }

    #[test]
    fn implied_ancestors_become_directories() {
        let h = build(&[ListingEntry::blob("a/b/c.txt")], "R");
        assert_eq!(h.len(), 3);
        assert!(h.get("R/a").unwrap().is_directory());
        assert!(h.get("R/a/b").unwrap().is_directory());
        assert!(!h.get("R/a/b/c.txt").unwrap().is_directory());
    }

    #[test]
    fn explicit_tree_entries_do_not_duplicate_nodes() {
        let entries = vec![
            ListingEntry::tree("a"),
            ListingEntry::blob("a/x"),
            ListingEntry::tree("a/c"),
            ListingEntry::blob("a/c/y"),
        ];
        let h = build(&entries, "R");
        assert_eq!(h.len(), 4);
        assert_eq!(children(&h, "R"), vec!["a"]);
        assert_eq!(children(&h, "R/a"), vec!["c", "x"]);
    }

    #[test]
    fn empty_tree_entry_is_still_a_directory() {
        let h = build(&[ListingEntry::tree("empty")], "R");
        assert!(h.get("R/empty").unwrap().is_directory());
    }

    #[test]
    fn directory_flag_is_never_downgraded() {
        let forward = build(&[ListingEntry::blob("a/b"), ListingEntry::blob("a")], "R");
        let backward = build(&[ListingEntry::blob("a"), ListingEntry::blob("a/b")], "R");
        assert!(forward.get("R/a").unwrap().is_directory());
        assert!(backward.get("R/a").unwrap().is_directory());
        assert_eq!(forward, backward);
    }

    #[test]
    fn ignores_empty_segments() {
        let h = build(&[ListingEntry::blob("a//b/"), ListingEntry::blob("")], "R");
        assert_eq!(h.len(), 2);
        assert!(h.get("R/a/b").is_some());
    }

    #[test]
    fn submodules_are_leaves() {
        let entry = ListingEntry {
            path: "vendor/lib".into(),
            kind: crate::contract::EntryKind::Commit,
        };
        let h = build(&[entry], "R");
        assert!(!h.get("R/vendor/lib").unwrap().is_directory());
    }
}
