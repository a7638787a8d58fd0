//! Resumable tasks
//!
//! A process body is an ordinary `async` block handed a [`Sys`] handle.
//! Calling `sys.call(syscall).await` parks the request in a slot shared with
//! the owning [`Task`] and suspends. The scheduler drives the task with a
//! no-op waker, so each resumption ends in exactly one of two outcomes:
//! the task yielded a syscall (found in the slot) or it finished with an
//! exit code. The kernel never looks any deeper than that.

use super::syscall::{SysValue, Syscall};
use crate::error::{KResult, KernelError};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

#[derive(Default)]
struct Slot {
    request: Option<Syscall>,
    response: Option<KResult<SysValue>>,
}

/// A task's doorway into the kernel
#[derive(Clone)]
pub struct Sys {
    slot: Rc<RefCell<Slot>>,
}

impl Sys {
    /// Yield `syscall` to the kernel and resume with its result
    pub async fn call(&self, syscall: Syscall) -> KResult<SysValue> {
        SyscallFuture {
            slot: self.slot.clone(),
            request: Some(syscall),
        }
        .await
    }
}

struct SyscallFuture {
    slot: Rc<RefCell<Slot>>,
    request: Option<Syscall>,
}

impl Future for SyscallFuture {
    type Output = KResult<SysValue>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut slot = this.slot.borrow_mut();
        if let Some(request) = this.request.take() {
            if slot.request.is_some() {
                return Poll::Ready(Err(KernelError::Internal(
                    "a syscall is already outstanding".into(),
                )));
            }
            slot.request = Some(request);
            return Poll::Pending;
        }
        match slot.response.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Entry point type of a program
pub type ProgramFuture = LocalBoxFuture<'static, i32>;

/// A named, cloneable program entry point: `(sys, argv) -> exit code`
#[derive(Clone)]
pub struct Program {
    name: Rc<str>,
    entry: Rc<dyn Fn(Sys, Vec<String>) -> ProgramFuture>,
}

impl Program {
    pub fn new<F, Fut>(name: &str, entry: F) -> Self
    where
        F: Fn(Sys, Vec<String>) -> Fut + 'static,
        Fut: Future<Output = i32> + 'static,
    {
        Self {
            name: name.into(),
            entry: Rc::new(move |sys, args| entry(sys, args).boxed_local()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a fresh task running this program
    pub fn instantiate(&self, args: Vec<String>) -> Task {
        let slot = Rc::new(RefCell::new(Slot::default()));
        let sys = Sys { slot: slot.clone() };
        Task {
            future: (self.entry)(sys, args),
            slot,
            awaiting: false,
        }
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Program({})", self.name)
    }
}

/// Outcome of one resumption
#[derive(Debug)]
pub enum Step {
    /// The task wants this performed and will resume with its result
    Syscall(Syscall),
    /// The task finished
    Exit(i32),
    /// The task suspended on something other than a syscall
    Stalled,
}

/// A process's resumable computation
pub struct Task {
    future: ProgramFuture,
    slot: Rc<RefCell<Slot>>,
    /// A syscall was yielded and its result not yet delivered
    awaiting: bool,
}

impl Task {
    /// Drive the task one step. `input` is the result of the syscall it
    /// last yielded; it is discarded if the task is not waiting on one
    /// (fresh tasks, including the target of an exec).
    pub fn resume(&mut self, input: Option<KResult<SysValue>>) -> Step {
        if self.awaiting {
            self.slot.borrow_mut().response = input;
            self.awaiting = false;
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        match self.future.as_mut().poll(&mut cx) {
            Poll::Ready(code) => Step::Exit(code),
            Poll::Pending => match self.slot.borrow_mut().request.take() {
                Some(syscall) => {
                    self.awaiting = true;
                    Step::Syscall(syscall)
                }
                None => Step::Stalled,
            },
        }
    }
}
