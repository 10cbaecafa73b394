use std::collections::BTreeMap;

use serde::Serialize;

use super::frame::{FrameId, FrameKey, FrameTree};

/// Name of the root of every diff tree.
pub const DIFF_ROOT_NAME: &str = "all";

/// Which side(s) of a comparison a node exists on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffKind {
    /// Only in the baseline.
    Removed,
    /// Only in the comparison.
    Added,
    /// In both.
    Shared,
}

/// Index of a node within its [`DiffTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DiffId(u32);

impl DiffId {
    /// The root of every diff tree.
    pub const ROOT: DiffId = DiffId(0);
}

/// One node of a [`DiffTree`].
#[derive(Clone, Debug)]
pub struct DiffNode<'a> {
    /// Sibling identity.
    pub key: FrameKey<'a>,
    /// Which side(s) the node exists on.
    pub kind: DiffKind,
    /// The matching node of the baseline tree.
    pub baseline: Option<FrameId>,
    /// The matching node of the comparison tree.
    pub comparison: Option<FrameId>,
    /// Baseline total samples (0 when added).
    pub baseline_samples: u64,
    /// Baseline total weight (0 when added).
    pub baseline_weight: u64,
    /// Comparison total samples (0 when removed).
    pub comparison_samples: u64,
    /// Comparison total weight (0 when removed).
    pub comparison_weight: u64,
    children: Vec<DiffId>,
}

/// The structural difference of two frame trees.
///
/// Removed and added subtrees are not copied; their nodes refer into the tree they came from.
#[derive(Debug)]
pub struct DiffTree<'a> {
    baseline: &'a FrameTree,
    comparison: &'a FrameTree,
    nodes: Vec<DiffNode<'a>>,
}

impl<'a> DiffTree<'a> {
    /// Compares `comparison` against `baseline`.
    pub fn new(baseline: &'a FrameTree, comparison: &'a FrameTree) -> Self {
        let mut diff = DiffTree {
            baseline,
            comparison,
            nodes: Vec::new(),
        };
        diff.push(
            FrameKey {
                name: DIFF_ROOT_NAME,
                synthetic: None,
            },
            Some(FrameId::ROOT),
            Some(FrameId::ROOT),
        );

        let mut stack = vec![(DiffId::ROOT, FrameId::ROOT, FrameId::ROOT)];
        while let Some((parent, b, c)) = stack.pop() {
            let mut union: BTreeMap<FrameKey<'a>, (Option<FrameId>, Option<FrameId>)> =
                BTreeMap::new();
            for child in baseline.children(b) {
                union.entry(baseline.key(child)).or_default().0 = Some(child);
            }
            for child in comparison.children(c) {
                union.entry(comparison.key(child)).or_default().1 = Some(child);
            }

            let mut children = Vec::with_capacity(union.len());
            for (key, (b, c)) in union {
                let id = diff.push(key, b, c);
                if let (Some(b), Some(c)) = (b, c) {
                    stack.push((id, b, c));
                }
                children.push(id);
            }
            diff.nodes[parent.0 as usize].children = children;
        }
        diff
    }

    fn push(&mut self, key: FrameKey<'a>, b: Option<FrameId>, c: Option<FrameId>) -> DiffId {
        let kind = match (b, c) {
            (Some(_), Some(_)) => DiffKind::Shared,
            (Some(_), None) => DiffKind::Removed,
            _ => DiffKind::Added,
        };
        let (baseline_samples, baseline_weight) = b.map_or((0, 0), |b| {
            let f = self.baseline.get(b);
            (f.total_samples, f.total_weight)
        });
        let (comparison_samples, comparison_weight) = c.map_or((0, 0), |c| {
            let f = self.comparison.get(c);
            (f.total_samples, f.total_weight)
        });
        let id = DiffId(self.nodes.len() as u32);
        self.nodes.push(DiffNode {
            key,
            kind,
            baseline: b,
            comparison: c,
            baseline_samples,
            baseline_weight,
            comparison_samples,
            comparison_weight,
            children: Vec::new(),
        });
        id
    }

    /// The root node, always shared.
    pub fn root(&self) -> &DiffNode<'a> {
        &self.nodes[0]
    }

    /// The node with the given id.
    pub fn get(&self, id: DiffId) -> &DiffNode<'a> {
        &self.nodes[id.0 as usize]
    }

    /// Children of a shared node in key order; removed and added nodes have none here (walk
    /// their side's tree instead).
    pub fn children(&self, id: DiffId) -> &[DiffId] {
        &self.get(id).children
    }

    /// The baseline tree.
    pub fn baseline(&self) -> &'a FrameTree {
        self.baseline
    }

    /// The comparison tree.
    pub fn comparison(&self) -> &'a FrameTree {
        self.comparison
    }

    /// Number of diff nodes (not counting the nodes of removed and added subtrees).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a diff tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Follows `path` of names from the root.
    pub fn find(&self, path: &[&str]) -> Option<DiffId> {
        let mut node = DiffId::ROOT;
        for name in path {
            node = *self
                .children(node)
                .iter()
                .find(|&&c| self.get(c).key.name == *name)?;
        }
        Some(node)
    }
}
