//! The kernel - process table, scheduler and host interface
//!
//! Inspired by Oxide's Hubris:
//! - Synchronous mental model, async implementation
//! - Small, auditable core
//!
//! Every process wraps a resumable [`Task`]. The scheduler pulls
//! `(pid, result)` pairs off the ready queue, resumes the task with the
//! result, and either finalizes it (it exited) or dispatches the syscall it
//! yielded onto the executor. When that syscall settles the process goes
//! back on the ready queue with the outcome. Only one task runs at a time,
//! so kernel state needs no locking; it sits in `RefCell`s and no borrow is
//! held across an `.await`.
//!
//! There is no global kernel: the host owns an `Rc<Kernel>` and every
//! syscall runs against a [`ProcessContext`] naming the kernel and the
//! calling pid.

pub mod builder;
pub mod connection;
pub mod executor;
pub mod ipc;
pub mod process;
pub mod pty;
pub mod stream;
pub mod syscall;
pub mod task;
pub mod timer;

pub use builder::KernelBuilder;
pub use connection::Connection;
pub use executor::{Executor, Priority, Spawner, TaskId};
pub use ipc::{Channel, Closed, TryRecv, TrySend};
pub use process::{
    Credentials, Environ, Fd, FdEntry, FileTable, OpenFlags, Pgid, Pid, Process, ProcessState,
};
pub use stream::{PollFlag, PollHook, Stream};
pub use syscall::{SysValue, Syscall, WaitOptions};
pub use task::{Program, Step, Sys, Task};
pub use timer::Clock;

use crate::config::KernelConfig;
use crate::error::{KResult, KernelError};
use crate::vfs::{path, HandleId, Inode, Vfs};
use futures::FutureExt;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::task::Poll;

/// Mode of the console stream inodes
const CONSOLE_MODE: u32 = 0o666;

// ========== Process context ==========

/// The kernel as seen by one process: what every syscall executes against
#[derive(Clone)]
pub struct ProcessContext {
    pub kernel: Rc<Kernel>,
    pub pid: Pid,
}

impl ProcessContext {
    pub fn new(kernel: Rc<Kernel>, pid: Pid) -> Self {
        Self { kernel, pid }
    }

    /// Same kernel, another process
    pub fn with_pid(&self, pid: Pid) -> Self {
        Self::new(self.kernel.clone(), pid)
    }

    /// Same kernel, acting as pid 0
    pub fn kernel_context(&self) -> Self {
        self.with_pid(Pid::KERNEL)
    }

    pub fn with_process<R>(&self, f: impl FnOnce(&Process) -> R) -> KResult<R> {
        self.kernel.with_process(self.pid, f)
    }

    pub fn with_process_mut<R>(&self, f: impl FnOnce(&mut Process) -> R) -> KResult<R> {
        self.kernel.with_process_mut(self.pid, f)
    }

    pub fn cred(&self) -> KResult<Credentials> {
        self.with_process(|p| p.cred.clone())
    }

    /// Absolute, normalized form of `path` against the process's cwd
    pub fn resolve(&self, path: &str) -> KResult<String> {
        let cwd = self.with_process(|p| p.cwd.clone())?;
        Ok(path::absolute(&cwd, path))
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProcessContext({})", self.pid)
    }
}

// ========== Process table ==========

/// Processes indexed by pid, plus group membership
#[derive(Default)]
struct ProcessTable {
    slots: Vec<Option<Process>>,
    groups: HashMap<Pgid, BTreeSet<Pid>>,
}

impl ProcessTable {
    fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid.0 as usize).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid.0 as usize).and_then(Option::as_mut)
    }

    /// Lowest unused pid above the kernel's
    fn next_pid(&self) -> Pid {
        let free = self
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .unwrap_or_else(|| self.slots.len().max(1));
        Pid(free as u32)
    }

    fn insert(&mut self, process: Process) {
        let slot = process.pid.0 as usize;
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }
        self.groups
            .entry(process.pgid)
            .or_default()
            .insert(process.pid);
        self.slots[slot] = Some(process);
    }

    fn remove(&mut self, pid: Pid) -> Option<Process> {
        let process = self.slots.get_mut(pid.0 as usize)?.take()?;
        self.leave_group(process.pgid, pid);
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Some(process)
    }

    fn leave_group(&mut self, pgid: Pgid, pid: Pid) {
        if let Some(members) = self.groups.get_mut(&pgid) {
            members.remove(&pid);
            if members.is_empty() {
                self.groups.remove(&pgid);
            }
        }
    }

    fn set_pgid(&mut self, pid: Pid, pgid: Pgid) -> KResult<()> {
        let process = self
            .get_mut(pid)
            .ok_or_else(|| KernelError::NoEntry(format!("process {}", pid.0)))?;
        let old = std::mem::replace(&mut process.pgid, pgid);
        self.leave_group(old, pid);
        self.groups.entry(pgid).or_default().insert(pid);
        Ok(())
    }

    fn iter(&self) -> impl Iterator<Item = &Process> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Hand every child of `pid` to the kernel context, so a later
    /// process reusing the pid does not inherit them
    fn orphan_children(&mut self, pid: Pid) -> usize {
        let mut moved = 0;
        for child in self.slots.iter_mut().flatten() {
            if child.parent == pid && child.pid != pid {
                child.parent = Pid::KERNEL;
                moved += 1;
            }
        }
        moved
    }
}

// ========== Kernel ==========

/// A process due for its next resumption, with the result of the syscall
/// it last yielded
struct ReadyRequest {
    pid: Pid,
    input: Option<KResult<SysValue>>,
}

pub struct Kernel {
    config: KernelConfig,
    vfs: Vfs,
    procs: RefCell<ProcessTable>,
    ready: Channel<ReadyRequest>,
    executor: RefCell<Executor>,
    spawner: Spawner,
    clock: Clock,
    /// stdin, stdout, stderr of the kernel context
    console: [Stream; 3],
}

impl Kernel {
    /// A kernel with an empty tree and only the kernel context (pid 0).
    /// Most hosts want [`KernelBuilder`] instead, which also boots the
    /// default image.
    pub fn new(config: KernelConfig) -> KResult<Rc<Self>> {
        let clock = Clock::new();
        let executor = Executor::new();
        let spawner = executor.spawner();
        let kernel = Rc::new(Self {
            vfs: Vfs::new(clock.clone(), config.max_symlink_depth, config.max_file_size),
            procs: RefCell::new(ProcessTable::default()),
            ready: Channel::new(),
            executor: RefCell::new(executor),
            spawner,
            clock,
            console: [Stream::new(), Stream::new(), Stream::new()],
            config,
        });

        kernel.procs.borrow_mut().insert(Process {
            pid: Pid::KERNEL,
            pgid: Pgid(0),
            parent: Pid::KERNEL,
            name: "kernel".into(),
            state: ProcessState::Running,
            files: FileTable::with_limit(kernel.config.max_fds),
            cred: Credentials::root(kernel.config.umask & 0o777),
            env: Environ::from(kernel.config.env.clone()),
            cwd: "/".into(),
            task: None,
            exit_waiters: Vec::new(),
        });

        let ctx = ProcessContext::new(kernel.clone(), Pid::KERNEL);
        for (stream, flags) in kernel.console.iter().zip([
            OpenFlags::READ,
            OpenFlags::WRITE,
            OpenFlags::WRITE,
        ]) {
            let inode = Inode::stream(CONSOLE_MODE, stream.clone());
            let hid = kernel.vfs.open_anonymous(&ctx, inode, flags)?;
            ctx.with_process_mut(|p| p.files.alloc(hid))??;
        }

        let weak = Rc::downgrade(&kernel);
        let ready = kernel.ready.clone();
        kernel
            .spawner
            .spawn_with_priority(schedule(weak, ready), Priority::Critical);
        Ok(kernel)
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    /// Context of the kernel pseudo-process
    pub fn context(self: &Rc<Self>) -> ProcessContext {
        ProcessContext::new(self.clone(), Pid::KERNEL)
    }

    pub(crate) fn with_process<R>(&self, pid: Pid, f: impl FnOnce(&Process) -> R) -> KResult<R> {
        let procs = self.procs.borrow();
        procs
            .get(pid)
            .map(f)
            .ok_or_else(|| KernelError::NoEntry(format!("process {}", pid.0)))
    }

    pub(crate) fn with_process_mut<R>(
        &self,
        pid: Pid,
        f: impl FnOnce(&mut Process) -> R,
    ) -> KResult<R> {
        let mut procs = self.procs.borrow_mut();
        procs
            .get_mut(pid)
            .map(f)
            .ok_or_else(|| KernelError::NoEntry(format!("process {}", pid.0)))
    }

    // ========== Process lifecycle ==========

    /// Create a Blocked child of `parent`. It inherits the parent's group,
    /// credentials, cwd, environment (unless `env` overrides it) and every
    /// open descriptor. It does not run until [`Kernel::make_ready`].
    pub(crate) fn create_process(
        &self,
        parent: &ProcessContext,
        program: Program,
        args: Vec<String>,
        env: Option<Environ>,
    ) -> KResult<Pid> {
        let (pgid, cred, cwd, inherited, files) = parent.with_process(|p| {
            (
                p.pgid,
                p.cred.clone(),
                p.cwd.clone(),
                p.env.clone(),
                p.files.clone_for_spawn(),
            )
        })?;
        for fd in files.fds() {
            self.vfs.retain(files.handle(fd)?)?;
        }
        let task = program.instantiate(args);

        let mut procs = self.procs.borrow_mut();
        let pid = procs.next_pid();
        procs.insert(Process {
            pid,
            pgid,
            parent: parent.pid,
            name: program.name().to_string(),
            state: ProcessState::Blocked,
            files,
            cred,
            env: env.unwrap_or(inherited),
            cwd,
            task: Some(task),
            exit_waiters: Vec::new(),
        });
        log::debug!("{} created {} ({})", parent.pid, pid, program.name());
        Ok(pid)
    }

    /// Queue a freshly created process for its first resumption
    pub(crate) fn make_ready(&self, pid: Pid) {
        let queued = self.with_process_mut(pid, |p| {
            if p.state == ProcessState::Blocked {
                p.state = ProcessState::Ready;
                true
            } else {
                false
            }
        });
        if let Ok(true) = queued {
            self.enqueue(pid, None);
        }
    }

    fn enqueue(&self, pid: Pid, input: Option<KResult<SysValue>>) {
        if let TrySend::Closed(_) = self.ready.try_put(ReadyRequest { pid, input }) {
            log::warn!("ready queue closed, {} dropped", pid);
        }
    }

    /// Finalize a process: close every descriptor, drop its task, mark it
    /// a zombie with `code` and wake its waiters
    pub(crate) fn terminate(self: &Rc<Self>, pid: Pid, code: i32) {
        if pid == Pid::KERNEL {
            log::warn!("refusing to terminate the kernel context");
            return;
        }
        let handles: KResult<Vec<HandleId>> = self.with_process_mut(pid, |p| {
            p.files
                .fds()
                .into_iter()
                .filter_map(|fd| p.files.remove(fd))
                .map(|entry| entry.handle)
                .collect()
        });
        let Ok(handles) = handles else {
            return;
        };

        let ctx = ProcessContext::new(self.clone(), pid);
        for hid in handles {
            if let Err(e) = self.vfs.release(&ctx, hid) {
                log::warn!("{}: releasing handle {}: {}", pid, hid.0, e);
            }
        }

        let finished = self.with_process_mut(pid, |p| {
            p.state = ProcessState::Zombie(code);
            (p.task.take(), std::mem::take(&mut p.exit_waiters))
        });
        let orphans = self.procs.borrow_mut().orphan_children(pid);
        if orphans > 0 {
            log::debug!("{}: {} children handed to the kernel", pid, orphans);
        }
        if let Ok((task, waiters)) = finished {
            drop(task);
            log::debug!("{} exited with {}", pid, code);
            for waker in waiters {
                waker.wake();
            }
        }
    }

    /// Direct children of `pid` with their groups, in pid order
    pub(crate) fn children_of(&self, pid: Pid) -> Vec<(Pid, Pgid)> {
        self.procs
            .borrow()
            .iter()
            .filter(|p| p.parent == pid && p.pid != pid)
            .map(|p| (p.pid, p.pgid))
            .collect()
    }

    /// Resolves once `pid` is a zombie or gone
    pub(crate) fn exited(&self, pid: Pid) -> impl Future<Output = Pid> + '_ {
        futures::future::poll_fn(move |cx| {
            let mut procs = self.procs.borrow_mut();
            match procs.get_mut(pid) {
                Some(p) if p.is_alive() => {
                    if !p.exit_waiters.iter().any(|w| w.will_wake(cx.waker())) {
                        p.exit_waiters.push(cx.waker().clone());
                    }
                    Poll::Pending
                }
                _ => Poll::Ready(pid),
            }
        })
    }

    pub(crate) fn set_pgid(&self, pid: Pid, pgid: Pgid) -> KResult<()> {
        self.procs.borrow_mut().set_pgid(pid, pgid)
    }

    pub(crate) fn process_exists(&self, pid: Pid) -> bool {
        self.procs.borrow().get(pid).is_some()
    }

    /// `(uid, primary gid)` of `pid`
    pub(crate) fn process_owner(&self, pid: Pid) -> Option<(u32, u32)> {
        self.procs
            .borrow()
            .get(pid)
            .map(|p| (p.cred.uid, p.cred.primary_gid()))
    }

    pub(crate) fn open_fds(&self, pid: Pid) -> Option<Vec<Fd>> {
        self.procs.borrow().get(pid).map(|p| p.files.fds())
    }

    // ========== Scheduler ==========

    /// Resume one ready process and act on what its task did
    fn drive(self: &Rc<Self>, request: ReadyRequest) {
        let ReadyRequest { pid, input } = request;
        let task = self.with_process_mut(pid, |p| {
            if p.state != ProcessState::Ready {
                return Err(p.state);
            }
            p.state = ProcessState::Running;
            Ok(p.task.take())
        });
        let task = match task {
            Ok(Ok(task)) => task,
            Ok(Err(state)) => {
                log::warn!("stale ready entry for {} ({:?})", pid, state);
                return;
            }
            Err(_) => {
                log::warn!("stale ready entry for reaped {}", pid);
                return;
            }
        };
        let Some(mut task) = task else {
            log::error!("{} is ready without a task", pid);
            self.terminate(pid, -1);
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| task.resume(input))) {
            Ok(Step::Syscall(syscall)) => {
                let _ = self.with_process_mut(pid, |p| {
                    p.task = Some(task);
                    p.state = ProcessState::Blocked;
                });
                let name = syscall.name();
                log::trace!("{} -> {}", pid, name);
                let ctx = ProcessContext::new(self.clone(), pid);
                self.spawner.spawn(async move {
                    match AssertUnwindSafe(syscall.execute(&ctx)).catch_unwind().await {
                        Ok(result) => ctx.kernel.settle(pid, result),
                        Err(_) => {
                            log::error!("{} panicked in {}", pid, name);
                            ctx.kernel.terminate(pid, -1);
                        }
                    }
                });
            }
            Ok(Step::Exit(code)) => {
                drop(task);
                self.terminate(pid, code);
            }
            Ok(Step::Stalled) => {
                log::error!("{} suspended outside a syscall", pid);
                drop(task);
                self.terminate(pid, -1);
            }
            Err(_) => {
                log::error!("{} panicked", pid);
                self.terminate(pid, -1);
            }
        }
    }

    /// A syscall finished: hand its result back to the process
    fn settle(&self, pid: Pid, result: KResult<SysValue>) {
        let resumed = self.with_process_mut(pid, |p| {
            if p.state == ProcessState::Blocked {
                p.state = ProcessState::Ready;
                true
            } else {
                false
            }
        });
        match resumed {
            Ok(true) => self.enqueue(pid, Some(result)),
            _ => log::debug!("{} gone before its syscall settled", pid),
        }
    }

    // ========== Host interface ==========

    /// Poll every ready executor task once
    pub fn tick(&self) -> usize {
        self.executor.borrow_mut().tick()
    }

    /// Tick until nothing is ready
    pub fn run_until_idle(&self) -> usize {
        self.executor.borrow_mut().run_until_idle()
    }

    /// Run to quiescence, jumping virtual time to the next timer whenever
    /// nothing else can make progress. Returns once nothing is ready and
    /// no timer is pending.
    pub fn run(&self) -> usize {
        let mut total = 0;
        loop {
            total += self.run_until_idle();
            match self.clock.next_deadline() {
                Some(deadline) => {
                    self.clock.advance_to(deadline);
                }
                None => return total,
            }
        }
    }

    /// Move kernel time forward, firing due timers. Returns how many
    /// sleepers woke.
    pub fn advance_to(&self, now: f64) -> usize {
        self.clock.advance_to(now)
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Spawn the program at `path` (searched along the kernel's `PATH` if
    /// it has no `/`) as a child of the kernel context
    pub fn spawn(self: &Rc<Self>, path: &str, args: Vec<String>) -> KResult<Pid> {
        let ctx = self.context();
        let program = syscall::proc::find_executable(&ctx, path)?
            .ok_or_else(|| KernelError::NoEntry(path.to_string()))?;
        syscall::proc::spawn(&ctx, program, args, None)
    }

    /// Spawn `program` directly as a child of the kernel context
    pub fn spawn_program(self: &Rc<Self>, program: Program, args: Vec<String>) -> KResult<Pid> {
        syscall::proc::spawn(&self.context(), program, args, None)
    }

    /// Exit code of a zombie
    pub fn exit_status(&self, pid: Pid) -> Option<i32> {
        self.procs.borrow().get(pid).and_then(Process::exit_code)
    }

    /// Remove a zombie from the process table, returning its exit code
    pub fn reap(&self, pid: Pid) -> Option<i32> {
        let mut procs = self.procs.borrow_mut();
        let code = procs.get(pid).and_then(Process::exit_code)?;
        procs.remove(pid);
        log::debug!("reaped {} ({})", pid, code);
        Some(code)
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcessState> {
        self.procs.borrow().get(pid).map(|p| p.state)
    }

    /// Live and zombie pids, ascending, without the kernel context
    pub fn pids(&self) -> Vec<Pid> {
        self.procs
            .borrow()
            .iter()
            .map(|p| p.pid)
            .filter(|pid| *pid != Pid::KERNEL)
            .collect()
    }

    /// Feed bytes to the kernel context's stdin
    pub fn push_console_input(&self, bytes: &[u8]) -> usize {
        self.console[0].try_write(bytes)
    }

    /// End the kernel context's stdin; readers see EOF once it drains
    pub fn close_console_input(&self) {
        self.console[0].close();
    }

    /// Drain whatever was written to stdout, then stderr
    pub fn take_console_output(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for stream in &self.console[1..] {
            out.extend(stream.try_read(stream.len()));
        }
        out
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("now", &self.clock.now())
            .field("pids", &self.pids())
            .field("inodes", &self.vfs.inode_count())
            .finish()
    }
}

/// The scheduler loop: drive each ready process in turn until the kernel
/// goes away
async fn schedule(kernel: Weak<Kernel>, ready: Channel<ReadyRequest>) {
    while let Some(request) = ready.get().await {
        let Some(kernel) = kernel.upgrade() else {
            break;
        };
        kernel.drive(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> Rc<Kernel> {
        Kernel::new(KernelConfig::default()).unwrap()
    }

    #[test]
    fn test_kernel_context() {
        let kernel = kernel();
        let ctx = kernel.context();
        assert_eq!(ctx.cred().unwrap().uid, 0);
        assert_eq!(ctx.resolve("a/../b").unwrap(), "/b");
        assert_eq!(
            kernel.open_fds(Pid::KERNEL).unwrap(),
            vec![Fd::STDIN, Fd::STDOUT, Fd::STDERR]
        );
        assert!(kernel.pids().is_empty());
    }

    #[test]
    fn test_program_exit_becomes_zombie() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(Program::new("seven", |_sys, _args| async { 7 }), vec![])
            .unwrap();
        assert_eq!(pid, Pid(1));
        assert_eq!(kernel.process_state(pid), Some(ProcessState::Ready));

        kernel.run();
        assert_eq!(kernel.process_state(pid), Some(ProcessState::Zombie(7)));
        assert_eq!(kernel.reap(pid), Some(7));
        assert_eq!(kernel.process_state(pid), None);
        assert_eq!(kernel.reap(pid), None);
    }

    #[test]
    fn test_pids_are_reused_lowest_first() {
        let kernel = kernel();
        let quick = || Program::new("quick", |_sys, _args| async { 0 });
        let a = kernel.spawn_program(quick(), vec![]).unwrap();
        let b = kernel.spawn_program(quick(), vec![]).unwrap();
        kernel.run();
        kernel.reap(a);
        let c = kernel.spawn_program(quick(), vec![]).unwrap();
        assert_eq!((a, b, c), (Pid(1), Pid(2), Pid(1)));
    }

    #[test]
    fn test_syscall_result_is_delivered() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(
                Program::new("me", |sys, _args| async move {
                    match sys.getpid().await {
                        Ok(pid) => pid.0 as i32 + 40,
                        Err(_) => -5,
                    }
                }),
                vec![],
            )
            .unwrap();
        kernel.run();
        assert_eq!(kernel.exit_status(pid), Some(41));
    }

    #[test]
    fn test_syscall_error_reaches_task() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(
                Program::new("bad", |sys, _args| async move {
                    match sys.close(Fd(99)).await {
                        Err(e) if e.code() == "EBADF" => 3,
                        _ => 0,
                    }
                }),
                vec![],
            )
            .unwrap();
        kernel.run();
        assert_eq!(kernel.exit_status(pid), Some(3));
    }

    #[test]
    fn test_panicking_task_exits_minus_one() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(
                Program::new("boom", |_sys, _args| async move {
                    if true {
                        panic!("boom");
                    }
                    0
                }),
                vec![],
            )
            .unwrap();
        let survivor = kernel
            .spawn_program(Program::new("ok", |_sys, _args| async { 0 }), vec![])
            .unwrap();
        kernel.run();
        assert_eq!(kernel.exit_status(pid), Some(-1));
        assert_eq!(kernel.exit_status(survivor), Some(0));
    }

    #[test]
    fn test_stalled_task_exits_minus_one() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(
                Program::new("stuck", |_sys, _args| async {
                    futures::pending!();
                    0
                }),
                vec![],
            )
            .unwrap();
        kernel.run();
        assert_eq!(kernel.exit_status(pid), Some(-1));
    }

    #[test]
    fn test_console_round_trip() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(
                Program::new("shout", |sys, _args| async move {
                    let Ok(data) = sys.read(Fd::STDIN, 16).await else {
                        return 1;
                    };
                    let upper = String::from_utf8_lossy(&data).to_uppercase();
                    match sys.print(&upper).await {
                        Ok(()) => 0,
                        Err(_) => 2,
                    }
                }),
                vec![],
            )
            .unwrap();
        kernel.run();
        assert_eq!(kernel.process_state(pid), Some(ProcessState::Blocked));

        kernel.push_console_input(b"hey");
        kernel.run();
        assert_eq!(kernel.exit_status(pid), Some(0));
        assert_eq!(kernel.take_console_output(), b"HEY".to_vec());
    }

    #[test]
    fn test_termination_closes_descriptors() {
        let kernel = kernel();
        let before = kernel.vfs().handle_count();
        let pid = kernel
            .spawn_program(Program::new("idle", |_sys, _args| async { 0 }), vec![])
            .unwrap();
        // The child shares the console handles
        assert_eq!(kernel.vfs().handle_count(), before);
        kernel.run();
        assert!(kernel.open_fds(pid).unwrap().is_empty());
        assert_eq!(kernel.vfs().handle_count(), before);
    }

    #[test]
    fn test_set_pgid_moves_group() {
        let kernel = kernel();
        let pid = kernel
            .spawn_program(Program::new("idle", |_sys, _args| async { 0 }), vec![])
            .unwrap();
        assert_eq!(kernel.children_of(Pid::KERNEL), vec![(pid, Pgid(0))]);
        kernel.set_pgid(pid, Pgid(5)).unwrap();
        assert_eq!(kernel.children_of(Pid::KERNEL), vec![(pid, Pgid(5))]);
        assert!(kernel.set_pgid(Pid(42), Pgid(1)).is_err());
    }
}
