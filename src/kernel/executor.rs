//! Async executor for cooperative multitasking
//!
//! Runs the scheduler loop and every in-flight syscall execution:
//! - Tick-based execution (the host decides when to spin the kernel)
//! - Task identity (tasks have IDs, ready order is by ID)
//! - Priority levels (the scheduler loop runs before syscall work)
//! - Proper wake semantics (no busy-waiting)
//!
//! Futures running on the executor spawn more work through a [`Spawner`],
//! which never borrows the executor itself, so spawning mid-tick is fine.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, RawWaker, RawWakerVTable, Waker};

/// Unique identifier for an executor task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// A boxed future representing a spawned task
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Task priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// The scheduler loop
    Critical = 0,
    /// Syscall executions
    #[default]
    Normal = 1,
    /// Bridge traffic that can wait a tick
    Background = 2,
}

/// A managed task with metadata
struct ManagedTask {
    id: TaskId,
    priority: Priority,
    future: BoxFuture,
}

/// State shared between the executor, its spawners and its wakers
struct Shared {
    /// Tasks that are ready to be polled (signaled by waker)
    ready: RefCell<BTreeSet<TaskId>>,
    /// Tasks waiting to be integrated (spawned since the last tick)
    pending_spawn: RefCell<VecDeque<ManagedTask>>,
    next_id: Cell<u64>,
}

/// Cloneable handle for spawning onto an [`Executor`]
#[derive(Clone)]
pub struct Spawner {
    shared: Rc<Shared>,
}

impl Spawner {
    /// Spawn a future with default (Normal) priority, returns task ID
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawn_with_priority(future, Priority::Normal)
    }

    /// Spawn a future with specified priority
    pub fn spawn_with_priority<F>(&self, future: F, priority: Priority) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = TaskId(self.shared.next_id.get());
        self.shared.next_id.set(id.0 + 1);

        self.shared.pending_spawn.borrow_mut().push_back(ManagedTask {
            id,
            priority,
            future: Box::pin(future),
        });
        // Mark as ready to run on the next tick
        self.shared.ready.borrow_mut().insert(id);
        id
    }
}

/// The executor - runs async tasks cooperatively, one tick at a time
pub struct Executor {
    /// All tasks, indexed by ID
    tasks: BTreeMap<TaskId, ManagedTask>,
    shared: Rc<Shared>,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            shared: Rc::new(Shared {
                ready: RefCell::new(BTreeSet::new()),
                pending_spawn: RefCell::new(VecDeque::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn spawner(&self) -> Spawner {
        Spawner {
            shared: self.shared.clone(),
        }
    }

    /// Spawn a future with default (Normal) priority, returns task ID
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawner().spawn(future)
    }

    /// Integrate pending spawns into the task map
    fn integrate_pending(&mut self) {
        let mut pending = self.shared.pending_spawn.borrow_mut();
        while let Some(task) = pending.pop_front() {
            self.tasks.insert(task.id, task);
        }
    }

    /// Run one tick of execution
    ///
    /// Polls all ready tasks once, in priority order (ID order within a
    /// priority). Returns the number of tasks that were polled.
    pub fn tick(&mut self) -> usize {
        self.integrate_pending();

        let mut ready_ids: Vec<TaskId> = self.shared.ready.borrow().iter().copied().collect();
        // Stable sort keeps ID order inside each priority
        ready_ids.sort_by_key(|id| {
            self.tasks
                .get(id)
                .map(|t| t.priority)
                .unwrap_or(Priority::Background)
        });

        let mut polled = 0;
        for task_id in ready_ids {
            self.shared.ready.borrow_mut().remove(&task_id);

            let Some(mut task) = self.tasks.remove(&task_id) else {
                continue;
            };

            let waker = self.create_waker(task_id);
            let mut cx = Context::from_waker(&waker);

            polled += 1;
            if task.future.as_mut().poll(&mut cx).is_pending() {
                // Re-added to the ready set when its waker fires
                self.tasks.insert(task_id, task);
            }
        }

        self.integrate_pending();
        polled
    }

    /// Tick until no task is ready. Returns the total number of polls.
    pub fn run_until_idle(&mut self) -> usize {
        let mut total = 0;
        while self.has_ready() {
            total += self.tick();
        }
        total
    }

    /// Whether any task is waiting to be polled
    pub fn has_ready(&self) -> bool {
        !self.shared.ready.borrow().is_empty()
    }

    /// Check if there are any active tasks
    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty() || !self.shared.pending_spawn.borrow().is_empty()
    }

    /// Get count of active tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len() + self.shared.pending_spawn.borrow().len()
    }

    /// Create a waker that marks a task as ready
    fn create_waker(&self, task_id: TaskId) -> Waker {
        let state = Box::new(WakerState {
            task_id,
            shared: self.shared.clone(),
        });
        let ptr = Box::into_raw(state) as *const ();
        let raw = RawWaker::new(ptr, &WAKER_VTABLE);
        unsafe { Waker::from_raw(raw) }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Boxed behind every waker handed out by the executor
struct WakerState {
    task_id: TaskId,
    shared: Rc<Shared>,
}

impl WakerState {
    fn signal(&self) {
        self.shared.ready.borrow_mut().insert(self.task_id);
    }
}

// Single-threaded waker: the Rc inside never crosses threads because the
// kernel never hands wakers to another thread.
const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

unsafe fn waker_clone(ptr: *const ()) -> RawWaker {
    unsafe {
        let state = &*(ptr as *const WakerState);
        let cloned = Box::new(WakerState {
            task_id: state.task_id,
            shared: state.shared.clone(),
        });
        RawWaker::new(Box::into_raw(cloned) as *const (), &WAKER_VTABLE)
    }
}

unsafe fn waker_wake(ptr: *const ()) {
    unsafe {
        let state = Box::from_raw(ptr as *mut WakerState);
        state.signal();
    }
}

unsafe fn waker_wake_by_ref(ptr: *const ()) {
    unsafe {
        let state = &*(ptr as *const WakerState);
        state.signal();
    }
}

unsafe fn waker_drop(ptr: *const ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut WakerState));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ipc::Completion;
    use std::cell::Cell;

    #[test]
    fn test_spawn_and_run() {
        let mut exec = Executor::new();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();

        exec.spawn(async move {
            ran_clone.set(true);
        });

        assert_eq!(exec.run_until_idle(), 1);
        assert!(ran.get());
        assert!(!exec.has_tasks());
    }

    #[test]
    fn test_pending_task_not_repolled_without_wake() {
        let mut exec = Executor::new();
        let counter = Rc::new(Cell::new(0));
        let counter_clone = counter.clone();

        exec.spawn(async move {
            counter_clone.set(counter_clone.get() + 1);
            futures::pending!(); // Yield without waking
        });

        exec.tick();
        assert_eq!(counter.get(), 1);

        assert_eq!(exec.tick(), 0);
        assert_eq!(counter.get(), 1);
        assert!(exec.has_tasks());
    }

    #[test]
    fn test_waker_requeues_task() {
        let mut exec = Executor::new();
        let done = Completion::<u32>::new();
        let seen = Rc::new(Cell::new(0));

        let waiter = done.wait();
        let seen_clone = seen.clone();
        exec.spawn(async move {
            seen_clone.set(waiter.await);
        });

        exec.run_until_idle();
        assert_eq!(seen.get(), 0);
        assert!(exec.has_tasks());

        done.complete(9).unwrap();
        assert!(exec.has_ready());
        exec.run_until_idle();
        assert_eq!(seen.get(), 9);
        assert!(!exec.has_tasks());
    }

    #[test]
    fn test_spawn_during_tick() {
        let mut exec = Executor::new();
        let spawner = exec.spawner();
        let order = Rc::new(RefCell::new(Vec::new()));

        let order_outer = order.clone();
        exec.spawn(async move {
            order_outer.borrow_mut().push("outer");
            let order_inner = order_outer.clone();
            spawner.spawn(async move {
                order_inner.borrow_mut().push("inner");
            });
        });

        // The inner task runs on the following tick
        assert_eq!(exec.tick(), 1);
        assert_eq!(*order.borrow(), vec!["outer"]);
        exec.run_until_idle();
        assert_eq!(*order.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_priority_order() {
        let mut exec = Executor::new();
        let spawner = exec.spawner();
        let order = Rc::new(RefCell::new(Vec::new()));

        for (name, priority) in [
            ("background", Priority::Background),
            ("normal", Priority::Normal),
            ("critical", Priority::Critical),
        ] {
            let order = order.clone();
            spawner.spawn_with_priority(
                async move {
                    order.borrow_mut().push(name);
                },
                priority,
            );
        }

        exec.tick();
        assert_eq!(*order.borrow(), vec!["critical", "normal", "background"]);
    }

    #[test]
    fn test_task_count() {
        let mut exec = Executor::new();
        assert_eq!(exec.task_count(), 0);

        exec.spawn(async {
            futures::pending!();
        });
        exec.spawn(async {
            futures::pending!();
        });
        assert_eq!(exec.task_count(), 2);

        exec.tick();
        assert_eq!(exec.task_count(), 2);
    }
}
