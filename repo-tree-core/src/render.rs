//! `tree`-style text rendering of a [`Hierarchy`].
//!
//! Depth-first, pre-order, children in ascending lexicographic order of their
//! segment name. The walk uses an explicit stack so deep listings cannot
//! overflow the call stack. Totals are counted from the same visit that emits
//! the lines.

use std::collections::HashSet;

use tracing::debug;

use crate::trie::{Hierarchy, HierarchyNode};

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const CONTINUATION: &str = "│   ";
const GAP: &str = "    ";

/// Rendered output plus the totals printed in its summary line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTree {
    pub text: String,
    pub directories: usize,
    pub files: usize,
}

struct Frame {
    full_path: String,
    prefix: String,
    is_last: bool,
}

fn push_children(stack: &mut Vec<Frame>, node: &HierarchyNode, prefix: &str) {
    let count = node.children().len();
    // Reverse so the lexicographically smallest child is popped first.
    for (i, name) in node.children().enumerate().rev() {
        stack.push(Frame {
            full_path: node.child_path(name),
            prefix: prefix.to_string(),
            is_last: i + 1 == count,
        });
    }
}

/// Render `hierarchy` as the root label, one line per descendant, a blank line
/// and a `"<D> directories, <F> files"` summary. The text ends with a newline.
pub fn render(hierarchy: &Hierarchy) -> RenderedTree {
    let root = hierarchy.root();
    let mut text = String::new();
    text.push_str(root.name());
    text.push('\n');

    let mut directories = 0usize;
    let mut files = 0usize;
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(root.full_path().to_string());

    let mut stack = Vec::new();
    push_children(&mut stack, root, "");

    while let Some(frame) = stack.pop() {
        if !seen.insert(frame.full_path.clone()) {
            continue;
        }
        let Some(node) = hierarchy.get(&frame.full_path) else {
            continue;
        };

        let connector = if frame.is_last { LAST_BRANCH } else { BRANCH };
        let suffix = if node.is_directory() { "/" } else { "" };
        text.push_str(&format!(
            "{}{}{}{}\n",
            frame.prefix,
            connector,
            node.name(),
            suffix
        ));

        if node.is_directory() {
            directories += 1;
        } else {
            files += 1;
        }

        let extension = if frame.is_last { GAP } else { CONTINUATION };
        let child_prefix = format!("{}{}", frame.prefix, extension);
        push_children(&mut stack, node, &child_prefix);
    }

    text.push_str(&format!("\n{} directories, {} files\n", directories, files));

    debug!(
        root = hierarchy.root_label(),
        directories, files, "Rendered hierarchy"
    );

    RenderedTree {
        text,
        directories,
        files,
    }
}
