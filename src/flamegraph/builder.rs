use super::frame::{FrameId, FrameTree, FrameType};
use crate::collect::{Collector, EventProcessor};
use crate::error::Result;
use crate::recording::{Event, StackTrace};

/// Event type folded when no other is configured.
pub const DEFAULT_EVENT_TYPE: &str = "jdk.ExecutionSample";

const UNKNOWN_CLASS: &str = "unknown";

/// Configure how events are folded into a tree.
#[derive(Clone, Debug)]
pub struct BuilderOptions {
    /// Put a synthetic frame naming the thread at the bottom of every stack.
    pub threads: bool,

    /// Distinguish frames by source line (`method:line`).
    pub lines: bool,

    /// Names of the event types to fold.
    ///
    /// [`DEFAULT_EVENT_TYPE`] by default.
    pub event_types: Vec<String>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        BuilderOptions {
            threads: false,
            lines: false,
            event_types: vec![DEFAULT_EVENT_TYPE.to_owned()],
        }
    }
}

/// A synthetic frame injected above the natural leaf of a stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopFrame {
    /// Class (or other) name the frame is keyed by.
    pub name: String,
    /// Synthetic category of the frame.
    pub kind: FrameType,
}

/// How an event contributes to a tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventShape {
    /// Plain execution samples and anything unrecognized.
    Simple,
    /// A sampled allocation of `class`.
    Allocation {
        /// Allocated class.
        class: String,
    },
    /// An allocation that started a new TLAB or bypassed TLABs.
    TlabAllocation {
        /// Allocated class.
        class: String,
        /// In a new TLAB, as opposed to outside any TLAB.
        new_tlab: bool,
    },
    /// Time spent blocked on a monitor or parked on an object of `class`.
    Blocking {
        /// Class of the monitor or blocker.
        class: String,
    },
}

impl EventShape {
    /// Classifies an event by its type name.
    pub fn of(event: &Event<'_>) -> Self {
        let class = |field: &str| {
            event
                .class_name(field)
                .unwrap_or_else(|| UNKNOWN_CLASS.to_owned())
        };
        match event.type_name() {
            "jdk.ObjectAllocationSample" => EventShape::Allocation {
                class: class("objectClass"),
            },
            "jdk.ObjectAllocationInNewTLAB" => EventShape::TlabAllocation {
                class: class("objectClass"),
                new_tlab: true,
            },
            "jdk.ObjectAllocationOutsideTLAB" => EventShape::TlabAllocation {
                class: class("objectClass"),
                new_tlab: false,
            },
            "jdk.JavaMonitorEnter" | "jdk.JavaMonitorWait" => EventShape::Blocking {
                class: class("monitorClass"),
            },
            "jdk.ThreadPark" => EventShape::Blocking {
                class: class("parkedClass"),
            },
            _ => EventShape::Simple,
        }
    }

    /// The weight an event of this shape adds to every frame it passes through.
    pub fn weight(&self, event: &Event<'_>) -> u64 {
        let weight = match self {
            EventShape::Simple => 1,
            EventShape::Allocation { .. } => event.long("weight").unwrap_or(0),
            EventShape::TlabAllocation { new_tlab: true, .. } => {
                event.long("tlabSize").unwrap_or(0)
            }
            EventShape::TlabAllocation { new_tlab: false, .. } => {
                event.long("allocationSize").unwrap_or(0)
            }
            EventShape::Blocking { .. } => event.duration_nanos(),
        };
        weight.max(0) as u64
    }

    /// The synthetic frame to inject above the leaf, if any.
    pub fn top_frame(self) -> Option<TopFrame> {
        match self {
            EventShape::Simple => None,
            EventShape::Allocation { class } => Some(TopFrame {
                name: class,
                kind: FrameType::AllocatedObject,
            }),
            EventShape::TlabAllocation { class, new_tlab } => Some(TopFrame {
                name: class,
                kind: if new_tlab {
                    FrameType::AllocatedObjectInNewTlab
                } else {
                    FrameType::AllocatedObjectOutsideTlab
                },
            }),
            EventShape::Blocking { class } => Some(TopFrame {
                name: class,
                kind: FrameType::BlockingObject,
            }),
        }
    }
}

/// Folds stacks into a [`FrameTree`].
#[derive(Debug)]
pub struct FrameTreeBuilder {
    tree: FrameTree,
    threads: bool,
    lines: bool,
    key: String,
}

impl Default for FrameTreeBuilder {
    fn default() -> Self {
        Self::new(&BuilderOptions::default())
    }
}

impl FrameTreeBuilder {
    /// A builder with an empty tree.
    pub fn new(opt: &BuilderOptions) -> Self {
        FrameTreeBuilder {
            tree: FrameTree::new(),
            threads: opt.threads,
            lines: opt.lines,
            key: String::new(),
        }
    }

    fn visit(
        &mut self,
        parent: FrameId,
        name: &str,
        synthetic: Option<FrameType>,
        kind: Option<FrameType>,
        weight: u64,
    ) -> FrameId {
        let id = self.tree.child(parent, name, synthetic);
        let node = self.tree.get_mut(id);
        node.total_samples += 1;
        node.total_weight += weight;
        if let Some(kind) = kind {
            node.counters.add(kind, 1);
        }
        id
    }

    fn enter_root(&mut self, weight: u64) {
        let root = self.tree.get_mut(FrameId::ROOT);
        root.total_samples += 1;
        root.total_weight += weight;
    }

    fn finish_leaf(&mut self, leaf: FrameId, weight: u64, top: Option<&TopFrame>) {
        let leaf = match top {
            Some(top) => self.visit(leaf, &top.name, Some(top.kind), None, weight),
            None => leaf,
        };
        let node = self.tree.get_mut(leaf);
        node.self_samples += 1;
        node.self_weight += weight;
    }

    /// Folds one event given its frames root-most first.
    ///
    /// Every visited node gains one sample and `weight`; the leaf (or `top`, when given) also
    /// gains them as self metrics. An event without frames counts as unattributed.
    pub fn add_event<'f, I>(&mut self, frames: I, weight: u64, top: Option<&TopFrame>)
    where
        I: IntoIterator<Item = (&'f str, FrameType)>,
    {
        let mut frames = frames.into_iter().peekable();
        if frames.peek().is_none() {
            self.add_unattributed(weight);
            return;
        }
        self.enter_root(weight);
        let mut node = FrameId::ROOT;
        for (name, kind) in frames {
            node = self.visit(node, name, None, Some(kind), weight);
        }
        self.finish_leaf(node, weight, top);
    }

    /// Folds a recorded stack trace (leaf first), honoring the thread and line options.
    pub fn add_stack_trace(
        &mut self,
        thread: Option<&str>,
        trace: &StackTrace,
        weight: u64,
        top: Option<&TopFrame>,
    ) {
        if trace.frames.is_empty() {
            self.add_unattributed(weight);
            return;
        }
        self.enter_root(weight);
        let mut node = FrameId::ROOT;
        if self.threads {
            let name = thread.unwrap_or(UNKNOWN_CLASS);
            node = self.visit(node, name, Some(FrameType::ThreadName), None, weight);
        }

        let mut key = std::mem::take(&mut self.key);
        for frame in trace.frames.iter().rev() {
            let name: &str = match frame.line {
                Some(line) if self.lines => {
                    key.clear();
                    key.push_str(&frame.method);
                    key.push(':');
                    key.push_str(itoa::Buffer::new().format(line));
                    &key
                }
                _ => &frame.method,
            };
            node = self.visit(node, name, None, Some(frame.frame_type), weight);
        }
        self.key = key;
        self.finish_leaf(node, weight, top);
    }

    /// Tallies an event without a stack trace.
    pub fn add_unattributed(&mut self, weight: u64) {
        self.tree.add_unattributed(1, weight);
    }

    /// The tree so far, without moving unattributed events into it.
    ///
    /// Partial trees are merged with [`FrameTree::merge`] and finished once at the end.
    pub fn into_partial(self) -> FrameTree {
        self.tree
    }

    /// The finished tree.
    pub fn build(self) -> FrameTree {
        let mut tree = self.tree;
        tree.finish_root();
        tree
    }
}

/// Folds the events of one session into a partial [`FrameTree`].
#[derive(Debug)]
pub struct FlamegraphProcessor {
    builder: FrameTreeBuilder,
    event_types: Vec<String>,
}

impl FlamegraphProcessor {
    /// A processor folding the event types named in `opt`.
    pub fn new(opt: &BuilderOptions) -> Self {
        FlamegraphProcessor {
            builder: FrameTreeBuilder::new(opt),
            event_types: opt.event_types.clone(),
        }
    }
}

impl EventProcessor for FlamegraphProcessor {
    type Partial = FrameTree;

    fn accepts(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    fn on_event(&mut self, event: &Event<'_>) -> Result<()> {
        let shape = EventShape::of(event);
        let weight = shape.weight(event);
        let top = shape.top_frame();
        match event.stack_trace()? {
            Some(trace) => {
                self.builder
                    .add_stack_trace(event.thread_name(), &trace, weight, top.as_ref())
            }
            None => self.builder.add_unattributed(weight),
        }
        Ok(())
    }

    fn get(self) -> FrameTree {
        self.builder.into_partial()
    }
}

/// Merges partial trees by key and finishes the root once.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameTreeCollector;

impl Collector for FrameTreeCollector {
    type Partial = FrameTree;
    type Output = FrameTree;

    fn empty(&self) -> FrameTree {
        FrameTree::new()
    }

    fn combine(&self, mut left: FrameTree, right: FrameTree) -> FrameTree {
        if left.is_empty() && left.unattributed() == (0, 0) {
            return right;
        }
        left.merge(&right);
        left
    }

    fn finish(&self, mut tree: FrameTree) -> FrameTree {
        tree.finish_root();
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::StackFrame;
    use std::rc::Rc;

    fn jit(names: &[&'static str]) -> Vec<(&'static str, FrameType)> {
        names.iter().map(|&n| (n, FrameType::JitCompiled)).collect()
    }

    #[test]
    fn totals_and_self_along_the_path() {
        let mut b = FrameTreeBuilder::default();
        b.add_event(jit(&["A", "B"]), 1, None);
        b.add_event(jit(&["A", "B"]), 1, None);
        b.add_event(jit(&["A", "C"]), 5, None);
        let tree = b.build();

        assert_eq!(tree.root().total_samples, 3);
        assert_eq!(tree.root().total_weight, 7);
        let a = tree.get(tree.find(&["A"]).unwrap());
        assert_eq!((a.total_samples, a.self_samples), (3, 0));
        let bnode = tree.get(tree.find(&["A", "B"]).unwrap());
        assert_eq!((bnode.total_samples, bnode.self_samples), (2, 2));
        let c = tree.get(tree.find(&["A", "C"]).unwrap());
        assert_eq!((c.total_weight, c.self_weight), (5, 5));
    }

    #[test]
    fn top_frame_takes_self_metrics() {
        let mut b = FrameTreeBuilder::default();
        let top = TopFrame {
            name: "byte[]".into(),
            kind: FrameType::AllocatedObject,
        };
        b.add_event(jit(&["main", "alloc"]), 128, Some(&top));
        let tree = b.build();

        let leaf_id = tree.find(&["main", "alloc"]).unwrap();
        let leaf = tree.get(leaf_id);
        assert_eq!((leaf.total_samples, leaf.total_weight), (1, 128));
        assert_eq!((leaf.self_samples, leaf.self_weight), (0, 0));

        let class = tree
            .find_child(leaf_id, "byte[]", Some(FrameType::AllocatedObject))
            .unwrap();
        let class = tree.get(class);
        assert_eq!((class.self_samples, class.self_weight), (1, 128));
        assert_eq!(class.frame_type(), FrameType::AllocatedObject);
    }

    #[test]
    fn threads_and_lines() {
        let opt = BuilderOptions {
            threads: true,
            lines: true,
            ..Default::default()
        };
        let mut b = FrameTreeBuilder::new(&opt);
        let trace = StackTrace {
            truncated: false,
            frames: vec![
                StackFrame {
                    method: Rc::from("Work.leaf"),
                    line: Some(7),
                    bci: None,
                    frame_type: FrameType::Inlined,
                },
                StackFrame {
                    method: Rc::from("Main.main"),
                    line: None,
                    bci: None,
                    frame_type: FrameType::Interpreted,
                },
            ],
        };
        b.add_stack_trace(Some("worker-1"), &trace, 1, None);
        let tree = b.build();

        let thread = tree
            .find_child(FrameId::ROOT, "worker-1", Some(FrameType::ThreadName))
            .unwrap();
        assert_eq!(tree.get(thread).frame_type(), FrameType::ThreadName);
        let main = tree.find_child(thread, "Main.main", None).unwrap();
        assert_eq!(tree.get(main).frame_type(), FrameType::Interpreted);
        let leaf = tree.find_child(main, "Work.leaf:7", None).unwrap();
        assert_eq!(tree.get(leaf).frame_type(), FrameType::Inlined);
    }

    #[test]
    fn stackless_events_become_native() {
        let mut b = FrameTreeBuilder::default();
        b.add_event(jit(&["A"]), 1, None);
        b.add_event(Vec::new(), 1, None);
        b.add_unattributed(1);
        let tree = b.build();
        assert_eq!(tree.root().total_samples, 3);
        let native = tree.get(tree.find(&["[native]"]).unwrap());
        assert_eq!(native.total_samples, 2);
        assert_eq!(native.frame_type(), FrameType::Native);
    }

    #[test]
    fn folding_twice_gives_the_same_tree() {
        let events = [jit(&["A", "B"]), jit(&["A"]), jit(&["C", "D", "E"])];
        let fold = || {
            let mut b = FrameTreeBuilder::default();
            for e in &events {
                b.add_event(e.iter().copied(), 2, None);
            }
            b.build()
        };
        let (x, y) = (fold(), fold());
        assert_eq!(x.len(), y.len());
        for path in [&["A", "B"][..], &["C", "D", "E"][..], &["A"][..]] {
            let (a, b) = (x.get(x.find(path).unwrap()), y.get(y.find(path).unwrap()));
            assert_eq!(a.total_samples, b.total_samples);
            assert_eq!(a.self_weight, b.self_weight);
        }
    }
}
