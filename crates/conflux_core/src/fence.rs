//! # Completion Fences
//!
//! A [`Fence`] stands for "work X will be done". Fences form a dependency
//! graph:
//!
//! ```text
//!   leaf (trigger) ──┐
//!                    ├──> combine(a, b) ──> scheduled job ──> ...
//!   leaf (trigger) ──┘
//! ```
//!
//! A node resolves once every dependency resolved and, for trigger-backed
//! nodes, once its trigger fired. Resolution is push-based: each node counts
//! outstanding arrivals and runs its continuations when the count hits zero,
//! so checking completion is a single atomic load.
//!
//! A resolved node drops its dependency edges. Frontier chains that are
//! extended every cycle therefore only keep unresolved work alive.
//!
//! Continuations never nest. The first resolution on a thread drains a
//! thread-local ready queue in a loop, and every resolution it triggers
//! only appends to that queue, so a chain of any depth resolves in constant
//! stack. Continuations must not block on fences they are resolving.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ReadyQueue {
    draining: bool,
    queue: VecDeque<Continuation>,
}

thread_local! {
    static READY: RefCell<ReadyQueue> = RefCell::new(ReadyQueue::default());
}

/// Clears the draining flag even if a continuation panics.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = READY.try_with(|ready| ready.borrow_mut().draining = false);
    }
}

/// Queues `continuations` and runs them unless a drain loop further up this
/// thread's stack will.
fn run_ready(continuations: Vec<Continuation>) {
    if continuations.is_empty() {
        return;
    }
    let owns_loop = READY.with(|ready| {
        let mut ready = ready.borrow_mut();
        ready.queue.extend(continuations);
        !std::mem::replace(&mut ready.draining, true)
    });
    if !owns_loop {
        return;
    }

    let _guard = DrainGuard;
    while let Some(next) = READY.with(|ready| ready.borrow_mut().queue.pop_front()) {
        next();
    }
}

struct NodeState {
    dependencies: Vec<Fence>,
    continuations: Vec<Continuation>,
}

struct FenceNode {
    id: u64,
    /// Outstanding arrivals before resolution.
    pending: AtomicUsize,
    done: AtomicBool,
    state: Mutex<NodeState>,
    resolved: Condvar,
}

impl FenceNode {
    /// Builds a node that waits on `dependencies` plus `own` extra arrivals,
    /// and wires the dependency arrivals.
    fn with_dependencies(dependencies: Vec<Fence>, own: usize) -> Arc<Self> {
        // One guard arrival so the node cannot resolve while it is still
        // registering on its dependencies.
        let node = Arc::new(Self {
            id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
            pending: AtomicUsize::new(dependencies.len() + own + 1),
            done: AtomicBool::new(false),
            state: Mutex::new(NodeState {
                dependencies: dependencies.clone(),
                continuations: Vec::new(),
            }),
            resolved: Condvar::new(),
        });

        for dependency in &dependencies {
            let waiter = Arc::clone(&node);
            dependency.when_complete(move || waiter.arrive());
        }
        node.arrive();
        node
    }

    fn arrive(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.resolve();
        }
    }

    fn resolve(&self) {
        let (continuations, dependencies) = {
            let mut state = self.state.lock();
            self.done.store(true, Ordering::Release);
            (
                std::mem::take(&mut state.continuations),
                std::mem::take(&mut state.dependencies),
            )
        };
        self.resolved.notify_all();
        drop(dependencies);
        run_ready(continuations);
    }

    #[inline]
    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Handle to a unit of work that will complete.
///
/// Cloning is cheap (one `Arc`). The default fence is already resolved.
#[derive(Clone, Default)]
pub struct Fence {
    node: Option<Arc<FenceNode>>,
}

impl Fence {
    /// A fence that is already resolved.
    #[inline]
    #[must_use]
    pub const fn completed() -> Self {
        Self { node: None }
    }

    /// Fence that resolves when both `a` and `b` resolved.
    ///
    /// Combining with a resolved fence returns the other input unchanged.
    #[must_use]
    pub fn combine(a: &Fence, b: &Fence) -> Fence {
        if a.is_complete() || a == b {
            return b.clone();
        }
        if b.is_complete() {
            return a.clone();
        }
        Fence {
            node: Some(FenceNode::with_dependencies(vec![a.clone(), b.clone()], 0)),
        }
    }

    /// Fence that resolves when every input resolved.
    #[must_use]
    pub fn combine_all<'a>(fences: impl IntoIterator<Item = &'a Fence>) -> Fence {
        let mut pending: Vec<Fence> = Vec::new();
        for fence in fences {
            if !fence.is_complete() && !pending.contains(fence) {
                pending.push(fence.clone());
            }
        }
        match pending.len() {
            0 => Fence::completed(),
            1 => pending.pop().unwrap_or_default(),
            _ => Fence {
                node: Some(FenceNode::with_dependencies(pending, 0)),
            },
        }
    }

    /// Returns true once the work behind this fence is done.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.node.as_ref().map_or(true, |node| node.is_done())
    }

    /// Whether this fence is ordered after `other`.
    ///
    /// True when `other` already resolved, when both are the same fence, or
    /// when `other` is reachable through this fence's dependencies.
    #[must_use]
    pub fn depends_on(&self, other: &Fence) -> bool {
        let Some(target) = &other.node else {
            return true;
        };
        if target.is_done() {
            return true;
        }
        let Some(start) = &self.node else {
            return false;
        };

        let mut visited = HashSet::new();
        let mut stack = vec![Arc::clone(start)];
        while let Some(node) = stack.pop() {
            if node.id == target.id {
                return true;
            }
            if !visited.insert(node.id) {
                continue;
            }
            let state = node.state.lock();
            stack.extend(state.dependencies.iter().filter_map(|f| f.node.clone()));
        }
        // Resolved nodes drop their edges; a target that resolved during the
        // walk is still ordered before us.
        target.is_done()
    }

    /// Runs `continuation` once this fence resolves.
    ///
    /// Runs immediately on the calling thread if already resolved, otherwise
    /// on the thread that resolves the fence.
    pub fn when_complete(&self, continuation: impl FnOnce() + Send + 'static) {
        let Some(node) = &self.node else {
            continuation();
            return;
        };
        if node.is_done() {
            continuation();
            return;
        }
        let mut state = node.state.lock();
        if node.is_done() {
            drop(state);
            continuation();
        } else {
            state.continuations.push(Box::new(continuation));
        }
    }

    /// Blocks the calling thread until the fence resolves.
    ///
    /// There is no timeout: a fence that never resolves blocks forever.
    pub fn wait(&self) {
        let Some(node) = &self.node else {
            return;
        };
        if node.is_done() {
            return;
        }
        let mut state = node.state.lock();
        while !node.is_done() {
            node.resolved.wait(&mut state);
        }
    }

    /// Waits up to `timeout`. Returns true if the fence resolved.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(node) = &self.node else {
            return true;
        };
        if node.is_done() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut state = node.state.lock();
        while !node.is_done() {
            if node.resolved.wait_until(&mut state, deadline).timed_out() {
                return node.is_done();
            }
        }
        true
    }

    /// Identifier for logging. Zero for the resolved default fence.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.node.as_ref().map_or(0, |node| node.id)
    }
}

impl PartialEq for Fence {
    fn eq(&self, other: &Self) -> bool {
        match (&self.node, &other.node) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Fence {}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.id())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// The producing side of a leaf fence.
///
/// Firing (or dropping) the trigger marks its own work as done. The fence
/// resolves once that happened and every dependency resolved.
pub struct FenceTrigger {
    node: Arc<FenceNode>,
}

impl FenceTrigger {
    /// Creates a pending fence with no dependencies and its trigger.
    #[must_use]
    pub fn new() -> (Fence, FenceTrigger) {
        Self::with_dependencies(Vec::new())
    }

    /// Creates a pending fence ordered after `dependency`.
    #[must_use]
    pub fn with_dependency(dependency: &Fence) -> (Fence, FenceTrigger) {
        if dependency.is_complete() {
            Self::new()
        } else {
            Self::with_dependencies(vec![dependency.clone()])
        }
    }

    fn with_dependencies(dependencies: Vec<Fence>) -> (Fence, FenceTrigger) {
        let node = FenceNode::with_dependencies(dependencies, 1);
        (
            Fence {
                node: Some(Arc::clone(&node)),
            },
            FenceTrigger { node },
        )
    }

    /// Marks the work as done.
    pub fn fire(self) {
        drop(self);
    }
}

impl Drop for FenceTrigger {
    fn drop(&mut self) {
        self.node.arrive();
    }
}

impl fmt::Debug for FenceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceTrigger").field("id", &self.node.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_default_fence_is_complete() {
        let fence = Fence::default();
        assert!(fence.is_complete());
        assert_eq!(fence.id(), 0);
        assert!(fence.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_trigger_resolves_fence() {
        let (fence, trigger) = FenceTrigger::new();
        assert!(!fence.is_complete());
        trigger.fire();
        assert!(fence.is_complete());
    }

    #[test]
    fn test_dropped_trigger_resolves_fence() {
        let (fence, trigger) = FenceTrigger::new();
        drop(trigger);
        assert!(fence.is_complete());
    }

    #[test]
    fn test_dependency_holds_back_trigger() {
        let (before, before_trigger) = FenceTrigger::new();
        let (after, after_trigger) = FenceTrigger::with_dependency(&before);

        after_trigger.fire();
        assert!(!after.is_complete(), "must wait for its dependency");

        before_trigger.fire();
        assert!(after.is_complete());
    }

    #[test]
    fn test_combine_waits_for_both() {
        let (a, ta) = FenceTrigger::new();
        let (b, tb) = FenceTrigger::new();
        let both = Fence::combine(&a, &b);

        ta.fire();
        assert!(!both.is_complete());
        tb.fire();
        assert!(both.is_complete());
    }

    #[test]
    fn test_combine_with_completed_is_identity() {
        let (a, _ta) = FenceTrigger::new();
        assert_eq!(Fence::combine(&a, &Fence::completed()), a);
        assert_eq!(Fence::combine(&Fence::completed(), &a), a);
        assert_eq!(Fence::combine(&a, &a), a);
    }

    #[test]
    fn test_combine_all() {
        let (a, ta) = FenceTrigger::new();
        let (b, tb) = FenceTrigger::new();
        let (c, tc) = FenceTrigger::new();
        let all = Fence::combine_all([&a, &b, &c, &Fence::completed()]);

        ta.fire();
        tb.fire();
        assert!(!all.is_complete());
        tc.fire();
        assert!(all.is_complete());

        assert!(Fence::combine_all(std::iter::empty()).is_complete());
    }

    #[test]
    fn test_depends_on() {
        let (a, _ta) = FenceTrigger::new();
        let (b, _tb) = FenceTrigger::new();
        let (chained, _tc) = FenceTrigger::with_dependency(&Fence::combine(&a, &b));

        assert!(chained.depends_on(&a));
        assert!(chained.depends_on(&b));
        assert!(chained.depends_on(&chained));
        assert!(!a.depends_on(&b));
        assert!(!Fence::completed().depends_on(&a));
        assert!(a.depends_on(&Fence::completed()));
    }

    #[test]
    fn test_resolved_target_is_always_a_dependency() {
        let (a, ta) = FenceTrigger::new();
        let (unrelated, _tu) = FenceTrigger::new();
        ta.fire();
        assert!(unrelated.depends_on(&a));
    }

    #[test]
    fn test_when_complete_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let (fence, trigger) = FenceTrigger::new();

        let c = Arc::clone(&count);
        fence.when_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        trigger.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = Arc::clone(&count);
        fence.when_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_across_threads() {
        let (fence, trigger) = FenceTrigger::new();
        let waiter = {
            let fence = fence.clone();
            thread::spawn(move || {
                fence.wait();
                fence.is_complete()
            })
        };
        thread::sleep(Duration::from_millis(10));
        trigger.fire();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_timeout_on_pending_fence() {
        let (fence, _trigger) = FenceTrigger::new();
        assert!(!fence.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_deep_chain_resolves_without_recursion() {
        const DEPTH: usize = 100_000;
        let (root, root_trigger) = FenceTrigger::new();
        let mut tip = root;
        let mut triggers = Vec::with_capacity(DEPTH);
        for _ in 0..DEPTH {
            let (next, trigger) = FenceTrigger::with_dependency(&tip);
            triggers.push(trigger);
            tip = next;
        }
        for trigger in triggers {
            trigger.fire();
        }
        assert!(!tip.is_complete());

        root_trigger.fire();
        assert!(tip.is_complete());
    }

    #[test]
    fn test_continuation_fired_inside_continuation_still_runs() {
        let (outer, outer_trigger) = FenceTrigger::new();
        let (inner, inner_trigger) = FenceTrigger::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        inner.when_complete(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        outer.when_complete(move || inner_trigger.fire());

        outer_trigger.fire();
        assert!(inner.is_complete());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolved_node_drops_edges() {
        let (a, ta) = FenceTrigger::new();
        let (b, tb) = FenceTrigger::new();
        let both = Fence::combine(&a, &b);
        ta.fire();
        tb.fire();

        let node = both.node.as_ref().unwrap();
        assert!(node.state.lock().dependencies.is_empty());
    }
}
