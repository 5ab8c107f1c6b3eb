// ── Single-flight coalescing ──
//
// At most one sync and one apply run at a time. A caller arriving while a
// run is in flight joins it and receives the same result instead of
// starting a second one. The work runs on its own task, so a caller that
// stops waiting never leaves a half-finished run behind.
//
// The run is handed a token owned by the flight. It is cancelled only when
// the last caller still waiting cancels; one caller cancelling never
// aborts a run that others are waiting on.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;

type Flight<T> = Shared<BoxFuture<'static, Result<T, CoreError>>>;
type Slot<T> = Arc<Mutex<Option<InFlight<T>>>>;

struct InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    future: Flight<T>,
    waiters: Arc<AtomicUsize>,
    abort: CancellationToken,
}

pub(crate) struct SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    name: &'static str,
    slot: Slot<T>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Start `work` with the flight's abort token, or join the run already
    /// in flight and drop `work` uncalled.
    ///
    /// Cancelling `cancel` makes this caller return `Cancelled` at once.
    /// The run itself is aborted only if no other caller is still waiting.
    pub(crate) async fn run<W, F>(&self, work: W, cancel: &CancellationToken) -> Result<T, CoreError>
    where
        W: FnOnce(CancellationToken) -> F,
        F: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let (flight, waiter, joined) = self.join_or_start(work);
        if joined {
            debug!(flight = self.name, "joined in-flight run");
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if waiter.leave() {
                    debug!(flight = self.name, "last waiter cancelled; aborting run");
                }
                Err(CoreError::Cancelled)
            }
            out = flight => out,
        }
    }

    /// Whether a run is currently in flight.
    pub(crate) fn is_running(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn join_or_start<W, F>(&self, work: W) -> (Flight<T>, Waiter, bool)
    where
        W: FnOnce(CancellationToken) -> F,
        F: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            let waiter = Waiter::join(&current.waiters, &current.abort);
            return (current.future.clone(), waiter, true);
        }

        let abort = CancellationToken::new();
        let waiters = Arc::new(AtomicUsize::new(0));
        let release = SlotRelease(Arc::clone(&self.slot));
        let run = work(abort.clone());
        let handle = tokio::spawn(async move {
            let _release = release;
            run.await
        });
        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(CoreError::Internal(format!("flight task failed: {e}"))))
        }
        .boxed()
        .shared();

        let waiter = Waiter::join(&waiters, &abort);
        *slot = Some(InFlight {
            future: future.clone(),
            waiters,
            abort,
        });
        (future, waiter, false)
    }
}

/// One caller's claim on a run. Dropping it stops counting the caller;
/// only [`leave`](Self::leave) may abort the run.
struct Waiter {
    waiters: Arc<AtomicUsize>,
    abort: CancellationToken,
    counted: bool,
}

impl Waiter {
    fn join(waiters: &Arc<AtomicUsize>, abort: &CancellationToken) -> Self {
        waiters.fetch_add(1, Ordering::SeqCst);
        Self {
            waiters: Arc::clone(waiters),
            abort: abort.clone(),
            counted: true,
        }
    }

    /// Stop waiting; aborts the run when nobody else is. Returns whether
    /// it did.
    fn leave(mut self) -> bool {
        self.counted = false;
        if self.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.abort.cancel();
            return true;
        }
        false
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.counted {
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Empties the slot when the run finishes, even by panic.
struct SlotRelease<T>(Slot<T>)
where
    T: Clone + Send + Sync + 'static;

impl<T> Drop for SlotRelease<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let flight = SingleFlight::<usize>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let work = |calls: Arc<AtomicUsize>| {
            move |_abort: CancellationToken| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };

        let (a, b) = tokio::join!(
            flight.run(work(Arc::clone(&calls)), &cancel),
            flight.run(work(Arc::clone(&calls)), &cancel),
        );
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flight.is_running());
    }

    #[tokio::test]
    async fn sequential_callers_run_again() {
        let flight = SingleFlight::<u8>::new("test");
        let cancel = CancellationToken::new();
        assert_eq!(flight.run(|_| async { Ok(1) }, &cancel).await.unwrap(), 1);
        assert_eq!(flight.run(|_| async { Ok(2) }, &cancel).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_returns_cancelled() {
        let flight = SingleFlight::<u8>::new("test");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = flight
            .run(
                |_| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(1)
                },
                &cancel,
            )
            .await;
        assert!(matches!(out, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn sole_waiter_cancelling_aborts_the_run() {
        let flight = SingleFlight::<u8>::new("test");
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let out = flight
            .run(
                move |abort: CancellationToken| async move {
                    abort.cancelled().await;
                    let _ = tx.send(());
                    Err(CoreError::Cancelled)
                },
                &cancel,
            )
            .await;
        assert!(matches!(out, Err(CoreError::Cancelled)));
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_continues_for_remaining_waiters() {
        let flight = SingleFlight::<u8>::new("test");
        let quitter = CancellationToken::new();
        let stayer = CancellationToken::new();
        let work = |abort: CancellationToken| async move {
            tokio::select! {
                () = abort.cancelled() => Err(CoreError::Cancelled),
                () = tokio::time::sleep(Duration::from_millis(50)) => Ok(7),
            }
        };

        let trigger = quitter.clone();
        let (first, second, ()) = tokio::join!(
            flight.run(work, &quitter),
            flight.run(work, &stayer),
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                trigger.cancel();
            },
        );
        assert!(matches!(first, Err(CoreError::Cancelled)));
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test]
    async fn errors_are_shared_too() {
        let flight = SingleFlight::<u8>::new("test");
        let cancel = CancellationToken::new();
        let failing = |_: CancellationToken| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(CoreError::Internal("boom".into()))
        };
        let (a, b) = tokio::join!(flight.run(failing, &cancel), flight.run(failing, &cancel));
        assert!(matches!(a, Err(CoreError::Internal(_))));
        assert!(matches!(b, Err(CoreError::Internal(_))));
    }
}
