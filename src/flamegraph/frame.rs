use std::cmp::Ordering;
use std::fmt;

use ahash::AHashMap;
use indexmap::IndexSet;
use serde::{Serialize, Serializer};

/// Name of the implicit root frame.
pub const ROOT_NAME: &str = "-";

/// Name of the frame that collects events without a stack trace.
pub const UNATTRIBUTED_NAME: &str = "[native]";

/// How a frame was executing, or what a synthetic frame stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameType {
    /// Interpreted Java code.
    Interpreted,
    /// Code compiled by the C1 (client) compiler.
    C1Compiled,
    /// Code compiled by the optimizing JIT compiler.
    JitCompiled,
    /// A method inlined into its caller.
    Inlined,
    /// Native code.
    Native,
    /// Code inside the JVM itself.
    Cpp,
    /// Kernel code.
    Kernel,
    /// Synthetic frame naming the sampled thread.
    ThreadName,
    /// Synthetic frame naming an allocated class.
    AllocatedObject,
    /// Synthetic frame naming a class allocated in a new TLAB.
    AllocatedObjectInNewTlab,
    /// Synthetic frame naming a class allocated outside any TLAB.
    AllocatedObjectOutsideTlab,
    /// Synthetic frame naming the class of a contended monitor or park blocker.
    BlockingObject,
}

impl FrameType {
    /// Maps the description a recorder attaches to a stack frame. Unknown descriptions are
    /// treated as compiled code.
    pub fn from_description(description: &str) -> Self {
        match description {
            "Interpreted" => FrameType::Interpreted,
            "C1 compiled" => FrameType::C1Compiled,
            "Inlined" => FrameType::Inlined,
            "Native" => FrameType::Native,
            "C++" => FrameType::Cpp,
            "Kernel" => FrameType::Kernel,
            _ => FrameType::JitCompiled,
        }
    }

    /// The description a recorder uses for this frame type; `None` for synthetic types.
    pub fn description(self) -> Option<&'static str> {
        Some(match self {
            FrameType::Interpreted => "Interpreted",
            FrameType::C1Compiled => "C1 compiled",
            FrameType::JitCompiled => "JIT compiled",
            FrameType::Inlined => "Inlined",
            FrameType::Native => "Native",
            FrameType::Cpp => "C++",
            FrameType::Kernel => "Kernel",
            _ => return None,
        })
    }

    /// Human-readable name.
    pub fn title(self) -> &'static str {
        match self.description() {
            Some(d) => d,
            None => match self {
                FrameType::ThreadName => "Thread",
                FrameType::AllocatedObject => "Allocated object",
                FrameType::AllocatedObjectInNewTlab => "Allocated in new TLAB",
                FrameType::AllocatedObjectOutsideTlab => "Allocated outside TLAB",
                _ => "Blocking object",
            },
        }
    }

    /// Whether frames of this type are injected rather than sampled.
    pub fn is_synthetic(self) -> bool {
        self.description().is_none()
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

impl Serialize for FrameType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.title())
    }
}

/// Per frame type sample counts of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCounters {
    /// [`FrameType::Interpreted`] samples.
    pub interpreted: u64,
    /// [`FrameType::C1Compiled`] samples.
    pub c1_compiled: u64,
    /// [`FrameType::JitCompiled`] samples.
    pub jit_compiled: u64,
    /// [`FrameType::Inlined`] samples.
    pub inlined: u64,
    /// [`FrameType::Native`] samples.
    pub native: u64,
    /// [`FrameType::Cpp`] samples.
    pub cpp: u64,
    /// [`FrameType::Kernel`] samples.
    pub kernel: u64,
}

impl TypeCounters {
    /// Counts `n` samples of `kind`; synthetic kinds are not counted.
    pub fn add(&mut self, kind: FrameType, n: u64) {
        let counter = match kind {
            FrameType::Interpreted => &mut self.interpreted,
            FrameType::C1Compiled => &mut self.c1_compiled,
            FrameType::JitCompiled => &mut self.jit_compiled,
            FrameType::Inlined => &mut self.inlined,
            FrameType::Native => &mut self.native,
            FrameType::Cpp => &mut self.cpp,
            FrameType::Kernel => &mut self.kernel,
            _ => return,
        };
        *counter += n;
    }

    fn merge(&mut self, other: &TypeCounters) {
        self.interpreted += other.interpreted;
        self.c1_compiled += other.c1_compiled;
        self.jit_compiled += other.jit_compiled;
        self.inlined += other.inlined;
        self.native += other.native;
        self.cpp += other.cpp;
        self.kernel += other.kernel;
    }

    /// Whether nothing was counted.
    pub fn is_empty(&self) -> bool {
        *self == TypeCounters::default()
    }
}

/// Index of a node within its [`FrameTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u32);

impl FrameId {
    /// The root of every tree.
    pub const ROOT: FrameId = FrameId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a node among its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey<'t> {
    /// Method, class or thread name.
    pub name: &'t str,
    /// The synthetic category, for injected frames.
    pub synthetic: Option<FrameType>,
}

impl Ord for FrameKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.synthetic.cmp(&other.synthetic))
    }
}

impl PartialOrd for FrameKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type ChildKey = (u32, Option<FrameType>);

/// One node of a call tree.
#[derive(Clone, Debug)]
pub struct Frame {
    name: u32,
    synthetic: Option<FrameType>,
    /// Samples that passed through this frame.
    pub total_samples: u64,
    /// Weight of the samples that passed through this frame.
    pub total_weight: u64,
    /// Samples for which this frame was the leaf.
    pub self_samples: u64,
    /// Weight of the samples for which this frame was the leaf.
    pub self_weight: u64,
    /// Samples per frame type.
    pub counters: TypeCounters,
    children: AHashMap<ChildKey, FrameId>,
}

impl Frame {
    fn new(name: u32, synthetic: Option<FrameType>) -> Self {
        Frame {
            name,
            synthetic,
            total_samples: 0,
            total_weight: 0,
            self_samples: 0,
            self_weight: 0,
            counters: TypeCounters::default(),
            children: AHashMap::new(),
        }
    }

    /// The synthetic category, for injected frames.
    pub fn synthetic(&self) -> Option<FrameType> {
        self.synthetic
    }

    /// The dominant frame type of this node's samples.
    pub fn frame_type(&self) -> FrameType {
        let c = &self.counters;
        let total = self.total_samples;
        if c.inlined * 3 >= total {
            FrameType::Inlined
        } else if c.c1_compiled * 2 >= total {
            FrameType::C1Compiled
        } else if c.interpreted * 2 >= total {
            FrameType::Interpreted
        } else if c.cpp > 0 {
            FrameType::Cpp
        } else if c.kernel > 0 {
            FrameType::Kernel
        } else if c.native > 0 {
            FrameType::Native
        } else if let Some(synthetic) = self.synthetic {
            synthetic
        } else {
            FrameType::JitCompiled
        }
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// A weighted call tree, stored as an arena of [`Frame`]s.
#[derive(Clone, Debug)]
pub struct FrameTree {
    names: IndexSet<Box<str>>,
    nodes: Vec<Frame>,
    unattributed_samples: u64,
    unattributed_weight: u64,
}

impl Default for FrameTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTree {
    /// A tree holding only the root.
    pub fn new() -> Self {
        let mut names = IndexSet::new();
        names.insert(Box::from(ROOT_NAME));
        FrameTree {
            names,
            nodes: vec![Frame::new(0, None)],
            unattributed_samples: 0,
            unattributed_weight: 0,
        }
    }

    /// The root node.
    pub fn root(&self) -> &Frame {
        &self.nodes[0]
    }

    /// The node with the given id.
    ///
    /// # Panics
    ///
    /// If `id` was not produced by this tree.
    pub fn get(&self, id: FrameId) -> &Frame {
        &self.nodes[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.nodes[id.index()]
    }

    /// Name of a node.
    pub fn name(&self, id: FrameId) -> &str {
        let name = self.get(id).name as usize;
        self.names.get_index(name).map_or("", |n| &**n)
    }

    /// Sibling identity of a node.
    pub fn key(&self, id: FrameId) -> FrameKey<'_> {
        FrameKey {
            name: self.name(id),
            synthetic: self.get(id).synthetic,
        }
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Events without a stack trace that have not yet been moved into the tree.
    pub fn unattributed(&self) -> (u64, u64) {
        (self.unattributed_samples, self.unattributed_weight)
    }

    pub(crate) fn add_unattributed(&mut self, samples: u64, weight: u64) {
        self.unattributed_samples += samples;
        self.unattributed_weight += weight;
    }

    /// Finds or creates the child of `parent` with the given key.
    pub(crate) fn child(
        &mut self,
        parent: FrameId,
        name: &str,
        synthetic: Option<FrameType>,
    ) -> FrameId {
        let name = match self.names.get_index_of(name) {
            Some(i) => i as u32,
            None => self.names.insert_full(Box::from(name)).0 as u32,
        };
        if let Some(&id) = self.nodes[parent.index()].children.get(&(name, synthetic)) {
            return id;
        }
        let id = FrameId(self.nodes.len() as u32);
        self.nodes.push(Frame::new(name, synthetic));
        self.nodes[parent.index()]
            .children
            .insert((name, synthetic), id);
        id
    }

    /// The child of `parent` with the given key, if present.
    pub fn find_child(
        &self,
        parent: FrameId,
        name: &str,
        synthetic: Option<FrameType>,
    ) -> Option<FrameId> {
        let name = self.names.get_index_of(name)? as u32;
        self.get(parent).children.get(&(name, synthetic)).copied()
    }

    /// Follows `path` from the root, preferring sampled over synthetic frames at each step.
    pub fn find(&self, path: &[&str]) -> Option<FrameId> {
        let mut node = FrameId::ROOT;
        for name in path {
            node = match self.find_child(node, name, None) {
                Some(id) => id,
                None => self
                    .sorted_children(node)
                    .into_iter()
                    .find(|&c| self.name(c) == *name)?,
            };
        }
        Some(node)
    }

    /// Children of a node, in no particular order.
    pub fn children(&self, id: FrameId) -> impl Iterator<Item = FrameId> + '_ {
        self.get(id).children.values().copied()
    }

    /// Children of a node, sorted by key.
    pub fn sorted_children(&self, id: FrameId) -> Vec<FrameId> {
        let mut children: Vec<_> = self.children(id).collect();
        children.sort_by(|&a, &b| self.key(a).cmp(&self.key(b)));
        children
    }

    /// Adds every node of `other` into this tree, matching nodes by key.
    pub fn merge(&mut self, other: &FrameTree) {
        self.unattributed_samples += other.unattributed_samples;
        self.unattributed_weight += other.unattributed_weight;

        let mut stack = vec![(FrameId::ROOT, FrameId::ROOT)];
        while let Some((theirs, ours)) = stack.pop() {
            let from = other.get(theirs);
            {
                let into = self.get_mut(ours);
                into.total_samples += from.total_samples;
                into.total_weight += from.total_weight;
                into.self_samples += from.self_samples;
                into.self_weight += from.self_weight;
                into.counters.merge(&from.counters);
            }
            for (&(name, synthetic), &child) in &from.children {
                let name = other.names.get_index(name as usize).map_or("", |n| &**n);
                let ours_child = self.child(ours, name, synthetic);
                stack.push((child, ours_child));
            }
        }
    }

    /// Moves events without a stack trace into a `[native]` child of the root.
    ///
    /// Afterwards the root's totals span every folded event and still equal the sum of its
    /// children's totals.
    pub fn finish_root(&mut self) {
        let (samples, weight) = (self.unattributed_samples, self.unattributed_weight);
        if samples == 0 && weight == 0 {
            return;
        }
        let id = self.child(FrameId::ROOT, UNATTRIBUTED_NAME, None);
        let node = self.get_mut(id);
        node.total_samples += samples;
        node.total_weight += weight;
        node.self_samples += samples;
        node.self_weight += weight;
        node.counters.add(FrameType::Native, samples);

        let root = self.get_mut(FrameId::ROOT);
        root.total_samples += samples;
        root.total_weight += weight;
        self.unattributed_samples = 0;
        self.unattributed_weight = 0;
    }

    /// Number of levels on the longest root-to-leaf path whose nodes all have at least `cutoff`
    /// total samples. The root always counts as one level.
    pub fn depth(&self, cutoff: u64) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(FrameId::ROOT, 1)];
        while let Some((id, level)) = stack.pop() {
            deepest = deepest.max(level);
            for child in self.children(id) {
                if self.get(child).total_samples >= cutoff {
                    stack.push((child, level + 1));
                }
            }
        }
        deepest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(total: u64, counters: TypeCounters, synthetic: Option<FrameType>) -> Frame {
        let mut f = Frame::new(0, synthetic);
        f.total_samples = total;
        f.counters = counters;
        f
    }

    #[test]
    fn frame_type_rules_in_order() {
        let inlined = TypeCounters {
            inlined: 4,
            interpreted: 6,
            ..Default::default()
        };
        assert_eq!(frame_with(10, inlined, None).frame_type(), FrameType::Inlined);

        let c1 = TypeCounters {
            inlined: 3,
            c1_compiled: 5,
            ..Default::default()
        };
        assert_eq!(frame_with(10, c1, None).frame_type(), FrameType::C1Compiled);

        let interpreted = TypeCounters {
            interpreted: 5,
            cpp: 5,
            ..Default::default()
        };
        assert_eq!(
            frame_with(10, interpreted, None).frame_type(),
            FrameType::Interpreted
        );

        let cpp = TypeCounters {
            interpreted: 4,
            cpp: 1,
            kernel: 5,
            ..Default::default()
        };
        assert_eq!(frame_with(10, cpp, None).frame_type(), FrameType::Cpp);

        let kernel = TypeCounters {
            kernel: 1,
            native: 9,
            ..Default::default()
        };
        assert_eq!(frame_with(10, kernel, None).frame_type(), FrameType::Kernel);

        let native = TypeCounters {
            native: 1,
            jit_compiled: 9,
            ..Default::default()
        };
        assert_eq!(frame_with(10, native, None).frame_type(), FrameType::Native);

        assert_eq!(
            frame_with(3, TypeCounters::default(), Some(FrameType::AllocatedObject)).frame_type(),
            FrameType::AllocatedObject
        );
        let jit = TypeCounters {
            jit_compiled: 1,
            ..Default::default()
        };
        assert_eq!(frame_with(1, jit, None).frame_type(), FrameType::JitCompiled);
    }

    #[test]
    fn frame_without_samples_is_inlined() {
        // 0 * 3 >= 0 already satisfies the first rule
        assert_eq!(
            frame_with(0, TypeCounters::default(), None).frame_type(),
            FrameType::Inlined
        );
        assert_eq!(
            frame_with(0, TypeCounters::default(), Some(FrameType::ThreadName)).frame_type(),
            FrameType::Inlined
        );
    }

    #[test]
    fn synthetic_and_sampled_frames_are_distinct() {
        let mut tree = FrameTree::new();
        let a = tree.child(FrameId::ROOT, "java.lang.String", None);
        let b = tree.child(FrameId::ROOT, "java.lang.String", Some(FrameType::AllocatedObject));
        assert_ne!(a, b);
        assert_eq!(tree.child(FrameId::ROOT, "java.lang.String", None), a);
        assert_eq!(tree.sorted_children(FrameId::ROOT), vec![a, b]);
        assert_eq!(tree.find(&["java.lang.String"]), Some(a));
    }

    #[test]
    fn merge_adds_by_key() {
        let mut left = FrameTree::new();
        let a = left.child(FrameId::ROOT, "a", None);
        left.get_mut(a).total_samples = 2;
        left.get_mut(FrameId::ROOT).total_samples = 2;

        let mut right = FrameTree::new();
        let a2 = right.child(FrameId::ROOT, "a", None);
        right.get_mut(a2).total_samples = 3;
        let b = right.child(a2, "b", None);
        right.get_mut(b).total_samples = 3;
        right.get_mut(FrameId::ROOT).total_samples = 3;
        right.add_unattributed(1, 7);

        left.merge(&right);
        assert_eq!(left.root().total_samples, 5);
        assert_eq!(left.get(left.find(&["a"]).unwrap()).total_samples, 5);
        assert_eq!(left.get(left.find(&["a", "b"]).unwrap()).total_samples, 3);
        assert_eq!(left.unattributed(), (1, 7));
    }

    #[test]
    fn finish_root_keeps_root_balanced() {
        let mut tree = FrameTree::new();
        let a = tree.child(FrameId::ROOT, "a", None);
        tree.get_mut(a).total_samples = 4;
        tree.get_mut(FrameId::ROOT).total_samples = 4;
        tree.add_unattributed(2, 20);
        tree.finish_root();

        let native = tree.find(&[UNATTRIBUTED_NAME]).unwrap();
        assert_eq!(tree.get(native).frame_type(), FrameType::Native);
        assert_eq!(tree.root().total_samples, 6);
        let sum: u64 = tree
            .children(FrameId::ROOT)
            .map(|c| tree.get(c).total_samples)
            .sum();
        assert_eq!(sum, tree.root().total_samples);
        assert_eq!(tree.unattributed(), (0, 0));
    }

    #[test]
    fn depth_respects_cutoff() {
        let mut tree = FrameTree::new();
        let a = tree.child(FrameId::ROOT, "a", None);
        let b = tree.child(a, "b", None);
        let c = tree.child(b, "c", None);
        tree.get_mut(a).total_samples = 10;
        tree.get_mut(b).total_samples = 10;
        tree.get_mut(c).total_samples = 1;
        assert_eq!(tree.depth(0), 4);
        assert_eq!(tree.depth(5), 3);
        assert_eq!(tree.depth(100), 1);
    }
}
