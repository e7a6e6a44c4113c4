//! Cooperative interruption.
//!
//! Each running fiber owns an [`InterruptSignal`]. Signals form a tree: a child
//! signal created for a parallel branch or a timed-out region is requested
//! whenever its parent is. Effects observe the signal through a
//! [`FiberContext`], which also records whether the current region may be
//! interrupted at all.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Notify;

use crate::exit::Exit;

/// A latch that flips once and wakes every waiter.
#[derive(Debug, Default)]
pub(crate) struct InterruptSignal {
    requested: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<InterruptSignal>>>,
}

impl InterruptSignal {
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(InterruptSignal::default())
    }

    /// A signal requested whenever `self` is.
    pub(crate) fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = InterruptSignal::root();
        {
            let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // Either `request` drained the list after our push, or we see its flag here.
        if self.is_requested() {
            child.request();
        }
        child
    }

    pub(crate) fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children =
            std::mem::take(&mut *self.children.lock().unwrap_or_else(PoisonError::into_inner));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.request();
        }
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once interruption has been requested.
    pub(crate) async fn requested(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// What a running effect knows about its fiber.
#[derive(Debug, Clone)]
pub(crate) struct FiberContext {
    signal: Arc<InterruptSignal>,
    interruptible: bool,
}

impl FiberContext {
    pub(crate) fn root() -> Self {
        FiberContext::with_signal(InterruptSignal::root())
    }

    pub(crate) fn with_signal(signal: Arc<InterruptSignal>) -> Self {
        FiberContext {
            signal,
            interruptible: true,
        }
    }

    /// A context whose signal is linked below this one.
    pub(crate) fn child(&self) -> Self {
        FiberContext {
            signal: self.signal.child(),
            interruptible: self.interruptible,
        }
    }

    pub(crate) fn uninterruptible(&self) -> Self {
        FiberContext {
            signal: Arc::clone(&self.signal),
            interruptible: false,
        }
    }

    pub(crate) fn interruptible(&self) -> Self {
        FiberContext {
            signal: Arc::clone(&self.signal),
            interruptible: true,
        }
    }

    /// Request interruption of this fiber and every fiber linked below it.
    pub(crate) fn interrupt(&self) {
        self.signal.request();
    }

    /// True if a request is pending and the region allows acting on it.
    pub(crate) fn should_interrupt(&self) -> bool {
        self.interruptible && self.signal.is_requested()
    }

    /// Run `fut`, abandoning it with an interruption if the fiber is
    /// interrupted while this region is interruptible.
    pub(crate) async fn guard<T, E, F>(&self, fut: F) -> Exit<T, E>
    where
        F: Future<Output = Exit<T, E>>,
    {
        if !self.interruptible {
            return fut.await;
        }
        if self.signal.is_requested() {
            return Exit::interrupt();
        }
        tokio::select! {
            biased;
            exit = fut => exit,
            () = self.signal.requested() => Exit::interrupt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_reaches_existing_and_late_children() {
        let root = InterruptSignal::root();
        let early = root.child();
        let grandchild = early.child();
        root.request();
        assert!(early.is_requested());
        assert!(grandchild.is_requested());
        let late = root.child();
        assert!(late.is_requested());
    }

    #[test]
    fn child_request_does_not_reach_parent() {
        let root = InterruptSignal::root();
        let child = root.child();
        child.request();
        assert!(!root.is_requested());
    }

    #[tokio::test]
    async fn guard_ignores_requests_in_uninterruptible_regions() {
        let ctx = FiberContext::root();
        ctx.interrupt();
        let exit: Exit<i32, ()> = ctx.uninterruptible().guard(async { Exit::succeed(1) }).await;
        assert_eq!(exit, Exit::succeed(1));
        let exit: Exit<i32, ()> = ctx.guard(async { Exit::succeed(1) }).await;
        assert!(exit.is_interrupted());
    }

    #[tokio::test]
    async fn guard_wakes_pending_future_on_request() {
        let ctx = FiberContext::root();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move {
            waiter
                .guard(futures::future::pending::<Exit<(), ()>>())
                .await
        });
        tokio::task::yield_now().await;
        ctx.interrupt();
        let exit = handle.await.unwrap();
        assert!(exit.is_interrupted());
    }
}
