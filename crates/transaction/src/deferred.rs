//! A promise-like, idempotently-settleable completion handle (`spec.md`
//! §4.5, component C5).
//!
//! Per the Design Notes ("realize as a pair of a one-shot channel and a
//! result cell; re-settle becomes a no-op by contract"), this is a small
//! hand-rolled `Future` over a shared result cell rather than a dependency
//! on an executor's own oneshot primitive, so it stays usable from the
//! single-threaded, executor-agnostic core the way the teacher's leaf crates
//! avoid pulling in `tokio` outside of tests.

use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{
        Context,
        Poll,
        Waker,
    },
};

use anyhow::Error;

enum Settlement<T> {
    Pending,
    Resolved(T),
    Rejected(Rc<Error>),
}

struct Shared<T> {
    settlement: Settlement<T>,
    wakers: Vec<Waker>,
}

/// A single-producer, multi-consumer completion handle. `resolve`/`reject`
/// are no-ops once the deferred has already settled, matching the spec's
/// idempotent-settlement requirement.
pub struct Deferred<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                settlement: Settlement::Pending,
                wakers: Vec::new(),
            })),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.shared.borrow().settlement, Settlement::Pending)
    }

    pub fn resolve(&self, value: T) {
        let mut shared = self.shared.borrow_mut();
        if !matches!(shared.settlement, Settlement::Pending) {
            return;
        }
        shared.settlement = Settlement::Resolved(value);
        for waker in shared.wakers.drain(..) {
            waker.wake();
        }
    }

    pub fn reject(&self, error: Error) {
        let mut shared = self.shared.borrow_mut();
        if !matches!(shared.settlement, Settlement::Pending) {
            return;
        }
        shared.settlement = Settlement::Rejected(Rc::new(error));
        for waker in shared.wakers.drain(..) {
            waker.wake();
        }
    }

    /// A future that resolves once this deferred settles. May be called
    /// more than once; every outstanding future is woken on settlement.
    pub fn wait(&self) -> DeferredFuture<T> {
        DeferredFuture {
            shared: self.shared.clone(),
        }
    }
}

pub struct DeferredFuture<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: Clone> Future for DeferredFuture<T> {
    type Output = Result<T, Rc<Error>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.borrow_mut();
        match &shared.settlement {
            Settlement::Pending => {
                shared.wakers.push(cx.waker().clone());
                Poll::Pending
            },
            Settlement::Resolved(v) => Poll::Ready(Ok(v.clone())),
            Settlement::Rejected(e) => Poll::Ready(Err(e.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_then_reject_does_not_change_settlement() {
        let d: Deferred<i32> = Deferred::new();
        d.resolve(1);
        d.reject(anyhow::anyhow!("too late"));
        assert!(!d.is_pending());
        assert_eq!(d.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn multiple_waiters_all_observe_settlement() {
        let d: Deferred<&'static str> = Deferred::new();
        let a = d.wait();
        let b = d.wait();
        d.resolve("done");
        assert_eq!(a.await.unwrap(), "done");
        assert_eq!(b.await.unwrap(), "done");
    }
}
