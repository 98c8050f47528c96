//! Modality queries over the forest
//!
//! A branch is one root-to-leaf path. It matches a query when the modalities
//! along it cover the requested set; the reported part of a matching branch is
//! its shortest prefix that still covers the set.

use super::builder::{Forest, NodeId, SeriesNode};
use crate::models::{Modality, ModalitySet, SeriesId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Nodes from a root downwards
pub type Branch = Vec<NodeId>;

/// One query result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMatch {
    /// A single matched path
    Branch(Branch),
    /// Every matched path under one root
    Group(Vec<Branch>),
}

impl QueryMatch {
    pub fn root(&self) -> Option<NodeId> {
        match self {
            QueryMatch::Branch(branch) => branch.first().copied(),
            QueryMatch::Group(branches) => branches.first().and_then(|b| b.first().copied()),
        }
    }

    /// Distinct non-root nodes, in first-seen order
    pub fn members(&self) -> Vec<NodeId> {
        let branches: &[Branch] = match self {
            QueryMatch::Branch(branch) => std::slice::from_ref(branch),
            QueryMatch::Group(branches) => branches,
        };
        let mut seen = BTreeSet::new();
        branches
            .iter()
            .flat_map(|b| b.iter().skip(1))
            .filter(|id| seen.insert(**id))
            .copied()
            .collect()
    }

    pub fn summarize(&self, forest: &Forest) -> MatchSummary {
        MatchSummary {
            root: self.root().map(|id| SeriesSummary::from(forest.node(id))),
            members: self
                .members()
                .into_iter()
                .map(|id| SeriesSummary::from(forest.node(id)))
                .collect(),
        }
    }
}

/// Identity of one series in query output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesSummary {
    pub series_id: SeriesId,
    pub modality: Modality,
    pub folder: String,
}

impl From<&SeriesNode> for SeriesSummary {
    fn from(node: &SeriesNode) -> Self {
        Self {
            series_id: node.series_id.clone(),
            modality: node.modality.clone(),
            folder: node.folder.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub root: Option<SeriesSummary>,
    pub members: Vec<SeriesSummary>,
}

/// Read-only query access to a forest
pub struct QueryEngine<'f> {
    forest: &'f Forest,
}

impl<'f> QueryEngine<'f> {
    pub fn new(forest: &'f Forest) -> Self {
        Self { forest }
    }

    /// Every root-to-leaf path, depth first, roots and children in forest order
    pub fn branches(&self) -> Vec<Branch> {
        let mut out = Vec::new();
        for &root in self.forest.roots() {
            let mut stack: Vec<Branch> = vec![vec![root]];
            while let Some(path) = stack.pop() {
                let Some(&last) = path.last() else {
                    continue;
                };
                let children = &self.forest.node(last).children;
                if children.is_empty() {
                    out.push(path);
                    continue;
                }
                // reversed so the first child is expanded first
                for &child in children.iter().rev() {
                    let mut next = path.clone();
                    next.push(child);
                    stack.push(next);
                }
            }
        }
        out
    }

    /// Full branches whose modalities cover `wanted`
    pub fn branch_matches(&self, wanted: &ModalitySet) -> Vec<Branch> {
        self.branches()
            .into_iter()
            .filter(|branch| wanted.is_covered_by(self.modalities(branch)))
            .collect()
    }

    /// Matched paths, grouped per root when `group_by_root` is set
    ///
    /// Each matching branch is cut to its shortest covering prefix, and
    /// branches that cut to the same prefix are reported once. Ungrouped, a
    /// result is therefore one distinct prefix rather than one leaf path:
    /// querying `RTSTRUCT` over CT ─ RTSTRUCT ─ {RTPLAN, RTDOSE} yields a
    /// single CT ─ RTSTRUCT result.
    pub fn query(&self, wanted: &ModalitySet, group_by_root: bool) -> Vec<QueryMatch> {
        let mut seen: BTreeSet<Branch> = BTreeSet::new();
        let mut matched: Vec<Branch> = Vec::new();
        for branch in self.branch_matches(wanted) {
            let prefix = self.covering_prefix(&branch, wanted);
            if seen.insert(prefix.clone()) {
                matched.push(prefix);
            }
        }

        if !group_by_root {
            return matched.into_iter().map(QueryMatch::Branch).collect();
        }

        let mut order: Vec<NodeId> = Vec::new();
        let mut groups: BTreeMap<NodeId, Vec<Branch>> = BTreeMap::new();
        for branch in matched {
            let Some(&root) = branch.first() else {
                continue;
            };
            let group = groups.entry(root).or_insert_with(|| {
                order.push(root);
                Vec::new()
            });
            group.push(branch);
        }
        order
            .into_iter()
            .filter_map(|root| groups.remove(&root))
            .map(QueryMatch::Group)
            .collect()
    }

    /// Shortest prefix of a covering branch that still covers `wanted`
    fn covering_prefix(&self, branch: &[NodeId], wanted: &ModalitySet) -> Branch {
        (1..=branch.len())
            .find(|&len| wanted.is_covered_by(self.modalities(&branch[..len])))
            .map(|len| branch[..len].to_vec())
            .unwrap_or_else(|| branch.to_vec())
    }

    fn modalities<'a>(&'a self, branch: &'a [NodeId]) -> impl Iterator<Item = &'a Modality> + 'a {
        branch.iter().map(move |id| &self.forest.node(*id).modality)
    }
}
