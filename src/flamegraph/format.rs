use indexmap::IndexSet;
use serde::Serialize;

use super::color::{self, ADDED, REMOVED};
use super::diff::{DiffId, DiffKind, DiffTree};
use super::frame::{Frame, FrameId, FrameTree, FrameType, TypeCounters};
use crate::error::{Error, Result};

/// Subtrees narrower than this share of the root are pruned by default.
pub const DEFAULT_MIN_SAMPLES_PERCENT: f64 = 0.1;

/// Levels beyond this depth are never emitted.
pub const MAX_LEVEL: usize = 1000;

/// Configure the level output of a frame tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// Prune subtrees whose total is below this percentage of the root total.
    ///
    /// [`DEFAULT_MIN_SAMPLES_PERCENT`] by default.
    pub min_samples_percent: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            min_samples_percent: DEFAULT_MIN_SAMPLES_PERCENT,
        }
    }
}

/// Configure the level output of a diff tree.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffOptions {
    /// Prune subtrees whose width is below this percentage of the root width.
    ///
    /// [`DEFAULT_MIN_SAMPLES_PERCENT`] by default.
    pub min_samples_percent: f64,

    /// Scale the baseline to the comparison's total before comparing.
    ///
    /// This can help when the two profiles were taken over different durations or under
    /// different load: without it, everything looks grown if the comparison simply has more
    /// samples. Widths are never scaled, only colours and deltas.
    pub normalize: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            min_samples_percent: DEFAULT_MIN_SAMPLES_PERCENT,
            normalize: false,
        }
    }
}

/// How a node of a diff graph compares to the other side.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffDetails {
    /// Which side(s) the node exists on.
    pub kind: DiffKind,
    /// Comparison minus baseline samples.
    pub samples: i64,
    /// Comparison minus baseline weight.
    pub weight: i64,
    /// Signed relative change of samples in percent; absent for added and removed nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_samples: Option<f64>,
    /// Signed relative change of weight in percent; absent for added and removed nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_weight: Option<f64>,
}

/// One rectangle of a flame graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlameNode {
    /// Offset from the left edge, in samples.
    pub left: u64,
    /// Width, in samples.
    pub total: u64,
    /// Weight of the samples the node spans.
    pub total_weight: u64,
    /// Samples for which this node was the leaf.
    pub self_samples: u64,
    /// Weight of the samples for which this node was the leaf.
    pub self_weight: u64,
    /// Dominant frame type.
    pub frame_type: FrameType,
    /// Fill colour, `rgb(r,g,b)`.
    pub color: String,
    /// Index into [`FlameGraph::titles`].
    pub title: usize,
    /// Samples per frame type.
    #[serde(skip_serializing_if = "TypeCounters::is_empty")]
    pub sample_types: TypeCounters,
    /// Comparison details, for diff graphs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffDetails>,
}

/// A flame graph as rows of rectangles, root row first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlameGraph {
    /// Number of rows.
    pub depth: usize,
    /// Rows of rectangles, each ordered left to right.
    pub levels: Vec<Vec<FlameNode>>,
    /// Deduplicated node titles.
    pub titles: Vec<String>,
}

impl FlameGraph {
    /// The title of a node.
    pub fn title(&self, node: &FlameNode) -> &str {
        self.titles.get(node.title).map_or("", |t| t)
    }

    /// The first node with the given title on the given level.
    pub fn find(&self, level: usize, title: &str) -> Option<&FlameNode> {
        self.levels
            .get(level)?
            .iter()
            .find(|n| self.title(n) == title)
    }
}

fn validate(min_samples_percent: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&min_samples_percent) {
        return Err(Error::InvalidArgument(format!(
            "minimum sample percentage must be between 0 and 100, got {}",
            min_samples_percent
        )));
    }
    Ok(())
}

fn cutoff(width: u64, min_samples_percent: f64) -> u64 {
    (width as f64 * min_samples_percent / 100.0).ceil() as u64
}

struct Levels {
    levels: Vec<Vec<FlameNode>>,
    titles: IndexSet<String>,
    truncated: bool,
}

impl Levels {
    fn new(depth: usize) -> Self {
        Levels {
            levels: Vec::with_capacity(depth.min(MAX_LEVEL)),
            titles: IndexSet::new(),
            truncated: false,
        }
    }

    fn title(&mut self, name: &str) -> usize {
        match self.titles.get_index_of(name) {
            Some(i) => i,
            None => self.titles.insert_full(name.to_owned()).0,
        }
    }

    fn push(&mut self, level: usize, node: FlameNode) {
        while self.levels.len() <= level {
            self.levels.push(Vec::new());
        }
        self.levels[level].push(node);
    }

    /// Whether children of a node on `level` may still be emitted.
    fn descend(&mut self, level: usize) -> bool {
        if level + 1 < MAX_LEVEL {
            return true;
        }
        if !self.truncated {
            warn!("flame graph is deeper than {} levels; truncating", MAX_LEVEL);
            self.truncated = true;
        }
        false
    }

    fn finish(self) -> FlameGraph {
        FlameGraph {
            depth: self.levels.len(),
            levels: self.levels,
            titles: self.titles.into_iter().collect(),
        }
    }
}

fn frame_node(levels: &mut Levels, frame: &Frame, name: &str, left: u64) -> FlameNode {
    let frame_type = frame.frame_type();
    FlameNode {
        left,
        total: frame.total_samples,
        total_weight: frame.total_weight,
        self_samples: frame.self_samples,
        self_weight: frame.self_weight,
        frame_type,
        color: color::css(color::frame_color(frame_type, name)),
        title: levels.title(name),
        sample_types: frame.counters,
        diff: None,
    }
}

/// Lays out a frame tree as levels.
///
/// Children are placed in key order, each starting where its previous sibling ended. Subtrees
/// below the minimum sample percentage are left out but still take up their width.
pub fn format_tree(tree: &FrameTree, opt: &Options) -> Result<FlameGraph> {
    validate(opt.min_samples_percent)?;
    let min = cutoff(tree.root().total_samples, opt.min_samples_percent);
    let mut levels = Levels::new(tree.depth(min));

    let mut stack = vec![(FrameId::ROOT, 0, 0)];
    let mut pending = Vec::new();
    while let Some((id, level, left)) = stack.pop() {
        let frame = tree.get(id);
        let node = frame_node(&mut levels, frame, tree.name(id), left);
        levels.push(level, node);
        if frame.child_count() == 0 || !levels.descend(level) {
            continue;
        }

        let mut offset = left;
        for child in tree.sorted_children(id) {
            let total = tree.get(child).total_samples;
            if total >= min {
                pending.push((child, level + 1, offset));
            }
            offset += total;
        }
        stack.extend(pending.drain(..).rev());
    }
    Ok(levels.finish())
}

#[derive(Clone, Copy)]
enum DiffWalk {
    Shared(DiffId),
    Flood(DiffKind, FrameId),
}

struct Scale {
    samples: f64,
    weight: f64,
}

fn percent(baseline: f64, comparison: f64) -> f64 {
    let sum = baseline + comparison;
    if sum > 0.0 {
        (comparison - baseline) / sum * 100.0
    } else {
        0.0
    }
}

/// Lays out a diff tree as levels.
///
/// Shared nodes are as wide as both sides together and coloured by how much they changed.
/// Removed and added subtrees are flooded with a single colour and carry signed deltas.
pub fn format_diff(diff: &DiffTree<'_>, opt: &DiffOptions) -> Result<FlameGraph> {
    validate(opt.min_samples_percent)?;
    let (baseline, comparison) = (diff.baseline(), diff.comparison());
    let root = diff.root();
    let min = cutoff(
        root.baseline_samples + root.comparison_samples,
        opt.min_samples_percent,
    );
    let scale = if opt.normalize && root.baseline_samples > 0 {
        Scale {
            samples: root.comparison_samples as f64 / root.baseline_samples as f64,
            weight: if root.baseline_weight > 0 {
                root.comparison_weight as f64 / root.baseline_weight as f64
            } else {
                1.0
            },
        }
    } else {
        Scale {
            samples: 1.0,
            weight: 1.0,
        }
    };
    let mut levels = Levels::new(baseline.depth(0).max(comparison.depth(0)));

    let mut stack = vec![(DiffWalk::Shared(DiffId::ROOT), 0, 0)];
    let mut pending = Vec::new();
    while let Some((walk, level, left)) = stack.pop() {
        match walk {
            DiffWalk::Shared(id) => {
                let node = diff.get(id);
                let (b, c) = (
                    node.baseline.map(|f| baseline.get(f)),
                    node.comparison.map(|f| comparison.get(f)),
                );
                // shared nodes exist on both sides
                let (b, c) = match (b, c) {
                    (Some(b), Some(c)) => (b, c),
                    _ => continue,
                };
                let bs = node.baseline_samples as f64 * scale.samples;
                let cs = node.comparison_samples as f64;
                let bw = node.baseline_weight as f64 * scale.weight;
                let cw = node.comparison_weight as f64;
                let frame_type = c.frame_type();
                let mut sample_types = c.counters;
                sample_types.add(FrameType::Interpreted, b.counters.interpreted);
                sample_types.add(FrameType::C1Compiled, b.counters.c1_compiled);
                sample_types.add(FrameType::JitCompiled, b.counters.jit_compiled);
                sample_types.add(FrameType::Inlined, b.counters.inlined);
                sample_types.add(FrameType::Native, b.counters.native);
                sample_types.add(FrameType::Cpp, b.counters.cpp);
                sample_types.add(FrameType::Kernel, b.counters.kernel);
                let title = levels.title(node.key.name);
                levels.push(
                    level,
                    FlameNode {
                        left,
                        total: node.baseline_samples + node.comparison_samples,
                        total_weight: node.baseline_weight + node.comparison_weight,
                        self_samples: b.self_samples + c.self_samples,
                        self_weight: b.self_weight + c.self_weight,
                        frame_type,
                        color: color::css(color::diff_color(bs, cs)),
                        title,
                        sample_types,
                        diff: Some(DiffDetails {
                            kind: DiffKind::Shared,
                            samples: (cs - bs).round() as i64,
                            weight: (cw - bw).round() as i64,
                            percent_samples: Some(percent(bs, cs)),
                            percent_weight: Some(percent(bw, cw)),
                        }),
                    },
                );
                if diff.children(id).is_empty() || !levels.descend(level) {
                    continue;
                }

                let mut offset = left;
                for &child in diff.children(id) {
                    let n = diff.get(child);
                    let (walk, width) = match n.kind {
                        DiffKind::Shared => (
                            DiffWalk::Shared(child),
                            n.baseline_samples + n.comparison_samples,
                        ),
                        DiffKind::Removed => match n.baseline {
                            Some(f) => (DiffWalk::Flood(DiffKind::Removed, f), n.baseline_samples),
                            None => continue,
                        },
                        DiffKind::Added => match n.comparison {
                            Some(f) => (DiffWalk::Flood(DiffKind::Added, f), n.comparison_samples),
                            None => continue,
                        },
                    };
                    if width >= min {
                        pending.push((walk, level + 1, offset));
                    }
                    offset += width;
                }
                stack.extend(pending.drain(..).rev());
            }
            DiffWalk::Flood(kind, id) => {
                let (tree, color, sign) = match kind {
                    DiffKind::Removed => (baseline, REMOVED, -1),
                    _ => (comparison, ADDED, 1),
                };
                let frame = tree.get(id);
                let mut node = frame_node(&mut levels, frame, tree.name(id), left);
                node.color = color::css(color);
                node.diff = Some(DiffDetails {
                    kind,
                    samples: sign * frame.total_samples as i64,
                    weight: sign * frame.total_weight as i64,
                    percent_samples: None,
                    percent_weight: None,
                });
                levels.push(level, node);
                if frame.child_count() == 0 || !levels.descend(level) {
                    continue;
                }

                let mut offset = left;
                for child in tree.sorted_children(id) {
                    let total = tree.get(child).total_samples;
                    if total >= min {
                        pending.push((DiffWalk::Flood(kind, child), level + 1, offset));
                    }
                    offset += total;
                }
                stack.extend(pending.drain(..).rev());
            }
        }
    }
    Ok(levels.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flamegraph::FrameTreeBuilder;
    use pretty_assertions::assert_eq;

    fn tree(stacks: &[(&str, u64)]) -> FrameTree {
        let mut b = FrameTreeBuilder::default();
        for &(stack, n) in stacks {
            for _ in 0..n {
                b.add_event(stack.split(';').map(|f| (f, FrameType::JitCompiled)), 1, None);
            }
        }
        b.build()
    }

    fn titles(graph: &FlameGraph, level: usize) -> Vec<(&str, u64, u64)> {
        graph.levels[level]
            .iter()
            .map(|n| (graph.title(n), n.left, n.total))
            .collect()
    }

    #[test]
    fn levels_and_offsets() {
        let t = tree(&[("main;a", 3), ("main;b", 2), ("other", 5)]);
        let graph = format_tree(&t, &Options::default()).unwrap();
        assert_eq!(graph.depth, 3);
        assert_eq!(titles(&graph, 0), vec![("-", 0, 10)]);
        assert_eq!(titles(&graph, 1), vec![("main", 0, 5), ("other", 5, 5)]);
        assert_eq!(titles(&graph, 2), vec![("a", 0, 3), ("b", 3, 2)]);
        assert_eq!(graph.titles.len(), 5);
    }

    #[test]
    fn pruned_children_still_take_space() {
        // 1000 samples: "small" is 0.5%, below a 1% threshold of 10
        let t = tree(&[("a", 5), ("b", 5), ("small", 5), ("z", 985)]);
        let opt = Options {
            min_samples_percent: 1.0,
        };
        let graph = format_tree(&t, &opt).unwrap();
        assert!(graph.find(1, "small").is_none());
        assert!(graph.find(1, "a").is_none());
        assert_eq!(graph.find(1, "z").unwrap().left, 15);

        let all = format_tree(&t, &Options { min_samples_percent: 0.0 }).unwrap();
        assert_eq!(all.find(1, "small").unwrap().left, 10);
    }

    #[test]
    fn root_is_always_emitted() {
        let graph = format_tree(&FrameTree::new(), &Options::default()).unwrap();
        assert_eq!(graph.depth, 1);
        assert_eq!(graph.levels[0][0].total, 0);
    }

    #[test]
    fn bad_thresholds_are_rejected() {
        for &pct in &[-1.0, f64::NAN, 100.5] {
            let opt = Options {
                min_samples_percent: pct,
            };
            assert!(matches!(
                format_tree(&FrameTree::new(), &opt),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn diff_levels() {
        let baseline = tree(&[("A", 10)]);
        let comparison = tree(&[("A", 4), ("C;D", 3)]);
        let diff = DiffTree::new(&baseline, &comparison);
        let graph = format_diff(&diff, &DiffOptions::default()).unwrap();

        assert_eq!(titles(&graph, 0), vec![("all", 0, 17)]);
        assert_eq!(titles(&graph, 1), vec![("A", 0, 14), ("C", 14, 3)]);
        assert_eq!(titles(&graph, 2), vec![("D", 14, 3)]);

        let a = graph.find(1, "A").unwrap().diff.clone().unwrap();
        assert_eq!(a.kind, DiffKind::Shared);
        assert_eq!(a.samples, -6);
        let c = graph.find(1, "C").unwrap();
        assert_eq!(c.color, color::css(ADDED));
        let d = graph.find(2, "D").unwrap();
        assert_eq!(d.color, color::css(ADDED));
        assert_eq!(d.diff.as_ref().unwrap().samples, 3);
        assert_eq!(d.diff.as_ref().unwrap().percent_samples, None);
    }

    #[test]
    fn normalization_scales_baseline() {
        let baseline = tree(&[("A", 10), ("B", 10)]);
        let comparison = tree(&[("A", 20), ("B", 20)]);
        let diff = DiffTree::new(&baseline, &comparison);

        let plain = format_diff(&diff, &DiffOptions::default()).unwrap();
        assert_eq!(plain.find(1, "A").unwrap().diff.as_ref().unwrap().samples, 10);

        let opt = DiffOptions {
            normalize: true,
            ..Default::default()
        };
        let normalized = format_diff(&diff, &opt).unwrap();
        let a = normalized.find(1, "A").unwrap();
        assert_eq!(a.diff.as_ref().unwrap().samples, 0);
        assert_eq!(a.color, color::css(color::NEUTRAL));
        assert_eq!(a.total, 30);
    }

    #[test]
    fn removed_subtrees_are_flooded() {
        let baseline = tree(&[("gone;deeper", 4), ("kept", 4)]);
        let comparison = tree(&[("kept", 4)]);
        let diff = DiffTree::new(&baseline, &comparison);
        let graph = format_diff(&diff, &DiffOptions::default()).unwrap();
        for (level, name) in [(1, "gone"), (2, "deeper")] {
            let node = graph.find(level, name).unwrap();
            assert_eq!(node.color, color::css(REMOVED));
            assert_eq!(node.diff.as_ref().unwrap().samples, -4);
            assert_eq!(node.diff.as_ref().unwrap().kind, DiffKind::Removed);
        }
    }
}
