use crate::{Error, Signal};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::{error, trace, warn};

type Computation<T, E> = Box<dyn FnOnce() -> Result<T, E> + Send + 'static>;

/// The computation's own result, or the fault that kept it from producing
/// one.
type Outcome<T, E> = Result<Result<T, E>, Error>;

/// A handle onto the result of one deferred computation.
///
/// The computation starts on its own thread the first time the promise is
/// observed and runs at most once, however many clones of the handle exist
/// and however they observe it. Every observer gets a copy of the same
/// result.
///
/// # Examples
///
/// ```
/// use lazy_promise::Promise;
/// use std::thread;
/// let promise = Promise::<String, String>::new(|| Ok(String::from("🍓")));
/// let other = promise.clone();
/// let task1 = thread::spawn(move || other.wait());
/// assert_eq!(promise.wait(), Ok(String::from("🍓")));
/// assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok(String::from("🍓")));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Inner<T, E>>,
    // This handle's own observer while it is being awaited.
    waiting: Option<Signal>,
}

struct Inner<T, E> {
    // Taking the computation out of the slot is the start gate.
    computation: Mutex<Option<Computation<T, E>>>,
    // Written once, before `completion` fires.
    outcome: OnceLock<Outcome<T, E>>,
    completion: Signal,
    config: Builder,
}

/// Configuration for the threads a promise runs on, in the manner of
/// [`std::thread::Builder`].
///
/// ```
/// use lazy_promise::Promise;
/// let promise = Promise::builder()
///     .name("lookup")
///     .build(|| Ok::<_, ()>(std::thread::current().name().map(String::from)));
/// assert_eq!(promise.wait(), Ok(Some(String::from("lookup"))));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the computation and callback threads. The name is also
    /// attached to log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Creates an unstarted promise over `computation`.
    pub fn build<T, E, F>(self, computation: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        Promise {
            inner: Arc::new(Inner {
                computation: Mutex::new(Some(Box::new(computation))),
                outcome: OnceLock::new(),
                completion: Signal::new(),
                config: self,
            }),
            waiting: None,
        }
    }

    /// Creates a promise that is already resolved with `result`. Its
    /// callbacks still run on threads configured by this builder.
    pub fn ready<T, E>(self, result: Result<T, E>) -> Promise<T, E>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let inner = Inner {
            computation: Mutex::new(None),
            outcome: OnceLock::from(Ok(result)),
            completion: Signal::new(),
            config: self,
        };
        inner.completion.fire();
        Promise {
            inner: Arc::new(inner),
            waiting: None,
        }
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("promise")
    }

    fn thread(&self) -> thread::Builder {
        let builder = thread::Builder::new().name(self.label().to_owned());
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

impl Promise<(), ()> {
    pub fn builder() -> Builder {
        Builder::new()
    }
}

impl<T, E> Promise<T, E> {
    /// Whether the computation has been handed to a thread. Promises created
    /// with [`Promise::ready`] count as started.
    pub fn is_started(&self) -> bool {
        self.inner
            .computation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Whether the result is available. Never triggers the computation.
    pub fn is_resolved(&self) -> bool {
        self.inner.completion.is_fired()
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new<F>(computation: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Builder::new().build(computation)
    }

    /// A promise that is already resolved with `result`. No thread is ever
    /// spawned for it.
    pub fn ready(result: Result<T, E>) -> Self {
        Builder::new().ready(result)
    }

    /// Triggers the computation without blocking and returns its completion
    /// signal. Every call hands out a handle on the same signal.
    ///
    /// ```
    /// use lazy_promise::Promise;
    /// let promise = Promise::<bool, ()>::new(|| Ok(true));
    /// promise.done().wait();
    /// assert!(promise.is_resolved());
    /// assert_eq!(promise.wait(), Ok(true));
    /// ```
    pub fn done(&self) -> Signal {
        self.start();
        self.inner.completion.clone()
    }

    fn start(&self) {
        let Some(computation) = self.inner.take_computation() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let spawned = self
            .inner
            .config
            .thread()
            .spawn(move || inner.run(computation));
        if let Err(err) = spawned {
            warn!(promise = self.inner.config.label(), %err, "could not spawn computation thread");
            self.inner.settle(Err(Error::Spawn(err.to_string())));
        }
    }

    fn outcome(&self) -> &Outcome<T, E> {
        self.start();
        self.inner.completion.wait();
        match self.inner.outcome.get() {
            Some(outcome) => outcome,
            None => unreachable!("completion fired before the outcome was stored"),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Triggers the computation if needed and blocks until it has resolved.
    ///
    /// # Panics
    ///
    /// Panics if the computation panicked or its thread could not be
    /// spawned. Use [`Promise::join`] to observe those faults as values.
    pub fn wait(&self) -> Result<T, E> {
        match self.join() {
            Ok(result) => result,
            Err(fault) => panic!("{fault}"),
        }
    }

    /// As [`Promise::wait`], but substitutes `default` for any failure.
    pub fn wait_or(&self, default: T) -> T {
        match self.join() {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => default,
            Err(fault) => {
                warn!(promise = self.inner.config.label(), %fault, "substituting default value");
                default
            }
        }
    }

    /// Blocks like [`Promise::wait`], reporting a faulted computation as
    /// `Err` the way [`std::thread::JoinHandle::join`] does.
    pub fn join(&self) -> Result<Result<T, E>, Error> {
        self.outcome().clone()
    }

    /// Runs `on_success` or `on_failure` on a separate thread once the
    /// promise has resolved. Never blocks the caller, unless no thread can
    /// be spawned: the callback then runs on the calling thread, after the
    /// promise has resolved.
    pub fn then<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        self.observe(move |result| match result {
            Ok(value) => on_success(value),
            Err(err) => on_failure(err),
        })
    }

    pub fn on_success<S>(&self, on_success: S)
    where
        S: FnOnce(T) + Send + 'static,
    {
        self.observe(move |result| {
            if let Ok(value) = result {
                on_success(value)
            }
        })
    }

    pub fn on_failure<F>(&self, on_failure: F)
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.observe(move |result| {
            if let Err(err) = result {
                on_failure(err)
            }
        })
    }

    /// Like `wait`, but a fault is re-raised with the `Error` itself as the
    /// payload so an enclosing promise records it unchanged.
    pub(crate) fn wait_propagating(&self) -> Result<T, E> {
        match self.join() {
            Ok(result) => result,
            Err(fault) => panic::resume_unwind(Box::new(fault)),
        }
    }

    fn observe<C>(&self, callback: C)
    where
        C: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.start();
        let slot = Arc::new(Mutex::new(Some(callback)));
        let promise = self.clone();
        let pending = slot.clone();
        let spawned = self
            .inner
            .config
            .thread()
            .spawn(move || promise.deliver(take(&*pending)));
        if let Err(err) = spawned {
            warn!(promise = self.inner.config.label(), %err, "could not spawn callback thread, running callback inline");
            self.deliver(take(&*slot));
        }
    }

    fn deliver<C>(&self, callback: Option<C>)
    where
        C: FnOnce(Result<T, E>),
    {
        let Some(callback) = callback else {
            return;
        };
        match self.join() {
            Ok(result) => callback(result),
            Err(fault) => {
                warn!(promise = self.inner.config.label(), %fault, "skipping callback")
            }
        }
    }
}

fn take<C>(slot: &Mutex<Option<C>>) -> Option<C> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl<T, E> Inner<T, E> {
    fn take_computation(&self) -> Option<Computation<T, E>> {
        self.computation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn run(&self, computation: Computation<T, E>) {
        trace!(promise = self.config.label(), "computation started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(computation)).map_err(|payload| {
            let fault = fault_from_panic(payload);
            error!(promise = self.config.label(), %fault, "computation panicked");
            fault
        });
        self.settle(outcome);
    }

    fn settle(&self, outcome: Outcome<T, E>) {
        if self.outcome.set(outcome).is_ok() {
            self.completion.fire();
            trace!(promise = self.config.label(), "resolved");
        }
    }
}

fn fault_from_panic(payload: Box<dyn Any + Send>) -> Error {
    let payload = match payload.downcast::<Error>() {
        Ok(fault) => return *fault,
        Err(payload) => payload,
    };
    if let Some(message) = payload.downcast_ref::<&str>() {
        Error::Panicked((*message).to_owned())
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Error::Panicked(message.clone())
    } else {
        Error::Panicked(String::from("non-string panic payload"))
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            waiting: None,
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("name", &self.inner.config.name)
            .field("started", &self.is_started())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Awaiting a promise triggers it and yields the same result as
/// [`Promise::wait`], including its panic on a faulted computation.
impl<T, E> Future for Promise<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.start();
        let completion = &this.inner.completion;
        let waiting = this.waiting.get_or_insert_with(|| completion.clone());
        match Pin::new(waiting).poll(cx) {
            Poll::Ready(()) => Poll::Ready(this.wait()),
            Poll::Pending => Poll::Pending,
        }
    }
}
