//! A one-shot broadcast signal. It fires once and can be observed by any
//! number of threads (blocking) or tasks (as a future), before or after it
//! has fired.
//!
use futures::future::FusedFuture;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

/// Read-only handle onto a promise's completion flag, as returned by
/// [`Promise::done`](crate::Promise::done).
///
/// Clones observe the same flag. Every handle is also a [`Future`] that
/// resolves once the signal has fired, which makes it usable in a multi-way
/// wait next to other futures.
///
/// # Examples
///
/// ```
/// use lazy_promise::Promise;
/// use futures::executor::block_on;
/// use std::thread;
/// let promise = Promise::<String, ()>::new(|| Ok(String::from("🍓")));
/// let observer = promise.done();
/// let task1 = thread::spawn(move || block_on(observer));
/// task1.join().expect("The task1 thread has panicked.");
/// assert!(promise.done().is_fired());
/// ```
///
/// Only the promise itself can fire its signal:
///
/// ```compile_fail
/// use lazy_promise::Promise;
/// let promise = Promise::<u32, String>::new(|| Ok(1));
/// promise.done().fire();
/// ```
#[derive(Debug)]
pub struct Signal {
    shared: Arc<Shared>,
    // Slot of this handle's waker, once it has been polled while pending.
    key: Option<usize>,
    terminated: bool,
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<Inner>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    fired: bool,
    next_key: usize,
    waker: Vec<(usize, Waker)>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            key: None,
            terminated: false,
        }
    }

    /// Fires the signal. Returns `true` for the one call that changed its
    /// state, `false` for every redundant call.
    pub(crate) fn fire(&self) -> bool {
        let waker = {
            let mut inner = self.shared.lock();
            if inner.fired {
                return false;
            }
            inner.fired = true;
            std::mem::take(&mut inner.waker)
        };
        self.shared.released.notify_all();
        for (_, waker) in waker {
            waker.wake()
        }
        true
    }

    pub fn is_fired(&self) -> bool {
        self.shared.lock().fired
    }

    /// Blocks the current thread until the signal has fired.
    pub fn wait(&self) {
        let mut inner = self.shared.lock();
        while !inner.fired {
            inner = self
                .shared
                .released
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.shared.lock().waker.len()
    }
}

impl Shared {
    // The flag only ever goes from false to true, so a poisoned guard is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for Signal {
    /// The clone shares the flag but is a fresh, unregistered future.
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            key: None,
            terminated: false,
        }
    }
}

impl Drop for Signal {
    /// Unregisters this handle's waker so abandoned observers do not pile up.
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.shared.lock().waker.retain(|(slot, _)| *slot != key);
        }
    }
}

impl Future for Signal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut inner = this.shared.lock();
        if inner.fired {
            drop(inner);
            this.terminated = true;
            return Poll::Ready(());
        }
        match this.key {
            Some(key) => {
                if let Some((_, waker)) = inner.waker.iter_mut().find(|(slot, _)| *slot == key) {
                    if !waker.will_wake(cx.waker()) {
                        *waker = cx.waker().clone();
                    }
                }
            }
            None => {
                let key = inner.next_key;
                inner.next_key += 1;
                inner.waker.push((key, cx.waker().clone()));
                this.key = Some(key);
            }
        }
        Poll::Pending
    }
}

impl FusedFuture for Signal {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[cfg(test)]
mod tests {
    use super::Signal;
    use futures::executor::block_on;
    use futures::task::noop_waker;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_fires_once() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(signal.is_fired());
        assert!(!signal.fire());
        assert!(signal.clone().is_fired());
    }

    #[test]
    fn test_signal_concurrent_fire_has_one_winner() {
        let signal = Signal::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let signal = signal.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if signal.fire() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.join().expect("The fire thread has panicked");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signal_releases_blocked_and_async_waiters() {
        let signal = Signal::new();
        let blocked = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        let awaiting: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || block_on(signal))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        signal.fire();
        blocked.join().expect("The blocked thread has panicked");
        for task in awaiting {
            task.join().expect("The awaiting thread has panicked");
        }
    }

    #[test]
    fn test_signal_observed_after_fire_returns_immediately() {
        let signal = Signal::new();
        signal.fire();
        signal.wait();
        block_on(signal.clone());
        block_on(signal);
    }

    #[test]
    fn test_signal_fused_after_ready() {
        use futures::future::FusedFuture;
        let mut signal = Signal::new();
        signal.fire();
        assert!(!signal.is_terminated());
        block_on(&mut signal);
        assert!(signal.is_terminated());
        assert!(!signal.clone().is_terminated());
    }

    #[test]
    fn test_signal_dropped_observer_unregisters_waker() {
        let signal = Signal::new();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut observer = signal.clone();
        assert_eq!(Pin::new(&mut observer).poll(&mut cx), Poll::Pending);
        assert_eq!(Pin::new(&mut observer).poll(&mut cx), Poll::Pending);
        assert_eq!(signal.registered(), 1);
        let mut other = signal.clone();
        assert_eq!(Pin::new(&mut other).poll(&mut cx), Poll::Pending);
        assert_eq!(signal.registered(), 2);
        drop(observer);
        assert_eq!(signal.registered(), 1);
        drop(other);
        assert_eq!(signal.registered(), 0);
        assert!(signal.fire());
    }
}
