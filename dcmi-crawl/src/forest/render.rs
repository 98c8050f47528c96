//! Text rendering of the forest and of query results

use super::builder::{Forest, NodeId};
use super::query::QueryMatch;
use std::fmt::Write;

/// Indented tree, one line per series, followed by the orphan list
pub fn render_tree(forest: &Forest) -> String {
    let mut out = String::new();
    for &root in forest.roots() {
        out.push_str(&node_line(forest, root));
        out.push('\n');
        render_children(forest, root, "", &mut out);
    }

    if !forest.orphans().is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "Orphans ({}):", forest.orphans().len());
        for orphan in forest.orphans() {
            let _ = write!(out, "  {} {}: {}", orphan.modality, orphan.series_id, orphan.reason);
            if let Some(target) = &orphan.referenced_series_id {
                let _ = write!(out, " (-> {})", target);
            }
            out.push('\n');
        }
    }
    out
}

fn render_children(forest: &Forest, id: NodeId, prefix: &str, out: &mut String) {
    let children = &forest.node(id).children;
    for (i, &child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        let _ = writeln!(out, "{}{}{}", prefix, branch, node_line(forest, child));
        render_children(forest, child, &format!("{}{}", prefix, indent), out);
    }
}

fn node_line(forest: &Forest, id: NodeId) -> String {
    let node = forest.node(id);
    let folder = if node.folder.is_empty() { "." } else { node.folder.as_str() };
    format!(
        "{} {} [{}] {} instance{}",
        node.modality,
        node.series_id,
        folder,
        node.instance_count,
        if node.instance_count == 1 { "" } else { "s" }
    )
}

/// One block per match: the root, then its matched series indented
pub fn render_matches(forest: &Forest, matches: &[QueryMatch]) -> String {
    let mut out = String::new();
    for m in matches {
        let summary = m.summarize(forest);
        if let Some(root) = &summary.root {
            let _ = writeln!(out, "{} {} [{}]", root.modality, root.series_id, root.folder);
        }
        for member in &summary.members {
            let _ = writeln!(out, "  {} {} [{}]", member.modality, member.series_id, member.folder);
        }
    }
    out
}
