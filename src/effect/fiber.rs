//! Handles to effects running on their own tokio task.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::effect::FiberContext;
use crate::exit::{Defect, Exit};

/// An effect running on its own tokio task.
///
/// ```rust
/// use reservoir::Effect;
///
/// # tokio_test::block_on(async {
/// let fiber = Effect::<(), ()>::never().fork(&());
/// let exit = fiber.interrupt().await;
/// assert!(exit.is_interrupted());
/// # });
/// ```
pub struct Fiber<T, E> {
    handle: JoinHandle<Exit<T, E>>,
    ctx: FiberContext,
}

impl<T, E> Fiber<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn spawn<F>(fut: F, ctx: FiberContext) -> Self
    where
        F: Future<Output = Exit<T, E>> + Send + 'static,
    {
        Fiber {
            handle: tokio::spawn(fut),
            ctx,
        }
    }

    /// Wait for the fiber to finish.
    pub async fn join(self) -> Exit<T, E> {
        match self.handle.await {
            Ok(exit) => exit,
            Err(err) if err.is_panic() => Exit::die(Defect::from_panic(err.into_panic())),
            Err(_) => Exit::interrupt(),
        }
    }

    /// Interrupt the fiber and wait until it has wound down.
    ///
    /// Every finalizer the fiber registered has run by the time this returns.
    pub async fn interrupt(self) -> Exit<T, E> {
        self.ctx.interrupt();
        self.join().await
    }

    /// Request interruption without waiting.
    pub fn interrupt_fork(&self) {
        self.ctx.interrupt();
    }

    /// True once the fiber has produced its exit.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T, E> std::fmt::Debug for Fiber<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
