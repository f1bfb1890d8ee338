//! The settle-once, callback-chaining future.
//!
//! One `Arc<Mutex<Inner>>` per future; every [`SettlableFuture`] value is a
//! cheap handle onto it. Settled values are shared as `Arc<T>`/`Arc<E>` so
//! any number of observers can read one settlement without cloning it.

use crate::Error;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

type ValueHandler<T> = Box<dyn FnOnce(Arc<T>) + Send>;
type ReasonHandler<E> = Box<dyn FnOnce(Arc<E>) + Send>;
type SettledHandler = Box<dyn FnOnce() + Send>;

/// Observable position of a future in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// Terminal outcome carried by a settled future.
#[derive(Debug)]
pub enum Settlement<T, E> {
    Fulfilled(Arc<T>),
    Rejected(Arc<E>),
}

impl<T, E> Clone for Settlement<T, E> {
    fn clone(&self) -> Self {
        match self {
            Settlement::Fulfilled(value) => Settlement::Fulfilled(value.clone()),
            Settlement::Rejected(reason) => Settlement::Rejected(reason.clone()),
        }
    }
}

/// What a [`SettlableFuture::then`] transform hands back: either a plain
/// value, or another future whose eventual outcome is forwarded into the
/// derived future (flattening).
pub enum Chained<U, E> {
    Value(U),
    Future(SettlableFuture<U, E>),
}

enum Slot<T, E> {
    Pending,
    Fulfilled(Arc<T>),
    Rejected(Arc<E>),
}

struct Inner<T, E> {
    slot: Slot<T, E>,
    on_fulfilled: Vec<ValueHandler<T>>,
    on_rejected: Vec<ReasonHandler<E>>,
    on_settled: Option<SettledHandler>,
    // Every clone of the future parks its own waker here; waking only the
    // most recent one leaves the other clones asleep.
    wakers: Vec<Waker>,
    live_settlers: usize,
    abandoned: bool,
}

/// A container that is settled exactly once, fulfilled or rejected, and fans
/// the outcome out to handlers registered before or after settlement.
///
/// Cloning yields another handle onto the same future; it can also be
/// awaited (see the [`Future`] impl), which resolves to the settlement or to
/// [`Error::SettlersDropped`] if settlement became impossible.
pub struct SettlableFuture<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for SettlableFuture<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for SettlableFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlableFuture")
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> SettlableFuture<T, E> {
    /// Snapshot of the lifecycle state.
    pub fn state(&self) -> State {
        match self.inner.lock().unwrap().slot {
            Slot::Pending => State::Pending,
            Slot::Fulfilled(_) => State::Fulfilled,
            Slot::Rejected(_) => State::Rejected,
        }
    }

    /// The fulfillment value, if this future has fulfilled.
    pub fn value(&self) -> Option<Arc<T>> {
        match &self.inner.lock().unwrap().slot {
            Slot::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if this future has rejected.
    pub fn reason(&self) -> Option<Arc<E>> {
        match &self.inner.lock().unwrap().slot {
            Slot::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// The terminal outcome, if this future has settled either way.
    pub fn settlement(&self) -> Option<Settlement<T, E>> {
        match &self.inner.lock().unwrap().slot {
            Slot::Pending => None,
            Slot::Fulfilled(value) => Some(Settlement::Fulfilled(value.clone())),
            Slot::Rejected(reason) => Some(Settlement::Rejected(reason.clone())),
        }
    }
}

impl<T, E> SettlableFuture<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates a pending future and synchronously runs `executor` with its
    /// two settlement entry points.
    ///
    /// The executor may settle the future before `new` returns, stash the
    /// handles somewhere that settles it later, or fail: an executor that
    /// returns `Err` without having settled the future leaves it rejected
    /// with that reason.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::executor::block_on;
    /// use settlable::{SettlableFuture, Settlement};
    /// use std::thread;
    ///
    /// let future = SettlableFuture::<String, String>::new(|resolve, _reject| {
    ///     thread::spawn(move || resolve.resolve("done".into()));
    ///     Ok(())
    /// });
    ///
    /// match block_on(future) {
    ///     Ok(Settlement::Fulfilled(value)) => assert_eq!(*value, "done"),
    ///     other => panic!("unexpected outcome: {other:?}"),
    /// }
    /// ```
    pub fn new<X>(executor: X) -> Self
    where
        X: FnOnce(Resolver<T, E>, Rejector<T, E>) -> Result<(), E>,
    {
        let future = Self::pending();
        let (resolver, rejector) = future.settlers();
        if let Err(reason) = executor(resolver, rejector) {
            future.settle_rejected(Arc::new(reason));
        }
        future
    }

    /// A pending future with no settlement handles attached yet.
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Pending,
                on_fulfilled: Vec::new(),
                on_rejected: Vec::new(),
                on_settled: None,
                wakers: Vec::new(),
                live_settlers: 0,
                abandoned: false,
            })),
        }
    }

    /// Hands out the two settlement entry points.
    ///
    /// The first settlement through either handle wins; every later attempt
    /// is silently ignored.
    pub fn settlers(&self) -> (Resolver<T, E>, Rejector<T, E>) {
        self.inner.lock().unwrap().live_settlers += 2;
        (
            Resolver {
                future: self.clone(),
            },
            Rejector {
                future: self.clone(),
            },
        )
    }

    /// Derives a new future by transforming this future's eventual value.
    ///
    /// - Already fulfilled: the transform runs now, in this call. A plain
    ///   [`Chained::Value`] fulfills the derived future; a
    ///   [`Chained::Future`] is flattened, the derived future adopting the
    ///   nested future's own eventual fulfillment or rejection; `Err`
    ///   rejects the derived future.
    /// - Already rejected: the derived future rejects with this future's
    ///   reason, without invoking the transform.
    /// - Pending: the transform is queued on the success path only. A source
    ///   that later rejects leaves the derived future pending forever; only
    ///   an already-rejected source forwards its reason across this hop.
    ///
    /// # Examples
    ///
    /// ```
    /// use settlable::{Chained, SettlableFuture};
    ///
    /// let source = SettlableFuture::<i32, String>::new(|resolve, _reject| {
    ///     resolve.resolve(1);
    ///     Ok(())
    /// });
    ///
    /// // Flattened: the derived future fulfills with 2, not with a future.
    /// let derived = source.then(|value| {
    ///     let next = value + 1;
    ///     Ok(Chained::Future(SettlableFuture::new(move |resolve, _reject| {
    ///         resolve.resolve(next);
    ///         Ok(())
    ///     })))
    /// });
    ///
    /// assert_eq!(derived.value().as_deref(), Some(&2));
    /// ```
    pub fn then<U, F>(&self, transform: F) -> SettlableFuture<U, E>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Result<Chained<U, E>, E> + Send + 'static,
    {
        let derived = SettlableFuture::pending();
        match self.settlement() {
            Some(Settlement::Fulfilled(value)) => run_transform(transform, value, &derived),
            Some(Settlement::Rejected(reason)) => derived.settle_rejected(reason),
            None => {
                // Success path only; a later rejection of the source is not
                // forwarded to the derived future.
                let downstream = derived.clone();
                self.push_on_fulfilled(Box::new(move |value| {
                    run_transform(transform, value, &downstream);
                }));
            }
        }
        derived
    }

    /// Registers a handler for the eventual rejection reason and returns a
    /// handle to the same future, for further chaining.
    ///
    /// On an already-rejected future the handler runs now, in this call. A
    /// future that fulfills never invokes it.
    ///
    /// # Examples
    ///
    /// ```
    /// use settlable::SettlableFuture;
    /// use std::sync::{Arc, Mutex};
    ///
    /// let observed = Arc::new(Mutex::new(None));
    /// let seen = observed.clone();
    ///
    /// SettlableFuture::<i32, String>::new(|_resolve, reject| {
    ///     reject.reject("boom".into());
    ///     Ok(())
    /// })
    /// .catch(move |reason| {
    ///     *seen.lock().unwrap() = Some(reason.clone());
    /// });
    ///
    /// assert_eq!(observed.lock().unwrap().as_deref(), Some("boom"));
    /// ```
    pub fn catch<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.push_on_rejected(Box::new(move |reason| handler(&reason)));
        self.clone()
    }

    /// Registers the completion handler, run exactly once when the future
    /// settles, after the success or failure handlers of that settlement,
    /// whichever way it went.
    ///
    /// At most one completion handler survives: a later registration
    /// replaces an earlier one. On an already-settled future the handler
    /// runs now, in this call.
    pub fn finally<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.slot, Slot::Pending) {
                inner.on_settled = Some(Box::new(handler));
                return;
            }
        }
        handler();
    }

    /// Runs `handler` with the fulfillment value: now if already fulfilled,
    /// at settlement if pending, never if this future rejects.
    fn push_on_fulfilled(&self, handler: ValueHandler<T>) {
        let ready = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            match &inner.slot {
                Slot::Pending => {
                    inner.on_fulfilled.push(handler);
                    return;
                }
                Slot::Fulfilled(value) => Some(value.clone()),
                Slot::Rejected(_) => None,
            }
        };
        if let Some(value) = ready {
            handler(value);
        }
    }

    /// Mirror of `push_on_fulfilled` for the rejection path.
    fn push_on_rejected(&self, handler: ReasonHandler<E>) {
        let ready = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            match &inner.slot {
                Slot::Pending => {
                    inner.on_rejected.push(handler);
                    return;
                }
                Slot::Rejected(reason) => Some(reason.clone()),
                Slot::Fulfilled(_) => None,
            }
        };
        if let Some(reason) = ready {
            handler(reason);
        }
    }

    /// First write wins: the transition and the registry drain happen under
    /// one lock acquisition, the drained handlers run after it is released
    /// so they may touch this future again.
    fn settle_fulfilled(&self, value: Arc<T>) {
        let (handlers, finisher, wakers) = {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.slot, Slot::Pending) {
                return;
            }
            inner.slot = Slot::Fulfilled(value.clone());
            inner.on_rejected.clear();
            (
                mem::take(&mut inner.on_fulfilled),
                inner.on_settled.take(),
                mem::take(&mut inner.wakers),
            )
        };
        for handler in handlers {
            handler(value.clone());
        }
        if let Some(finisher) = finisher {
            finisher();
        }
        for waker in wakers {
            waker.wake();
        }
    }

    fn settle_rejected(&self, reason: Arc<E>) {
        let (handlers, finisher, wakers) = {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.slot, Slot::Pending) {
                return;
            }
            inner.slot = Slot::Rejected(reason.clone());
            inner.on_fulfilled.clear();
            (
                mem::take(&mut inner.on_rejected),
                inner.on_settled.take(),
                mem::take(&mut inner.wakers),
            )
        };
        for handler in handlers {
            handler(reason.clone());
        }
        if let Some(finisher) = finisher {
            finisher();
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Applies a `then` transform to a settled value and settles the derived
/// future from its outcome, flattening a nested future.
fn run_transform<T, U, E, F>(transform: F, value: Arc<T>, derived: &SettlableFuture<U, E>)
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnOnce(&T) -> Result<Chained<U, E>, E>,
{
    match transform(&value) {
        Ok(Chained::Value(plain)) => derived.settle_fulfilled(Arc::new(plain)),
        Ok(Chained::Future(nested)) => {
            let on_value = derived.clone();
            let on_reason = derived.clone();
            nested.push_on_fulfilled(Box::new(move |value| on_value.settle_fulfilled(value)));
            nested.push_on_rejected(Box::new(move |reason| on_reason.settle_rejected(reason)));
        }
        Err(reason) => derived.settle_rejected(Arc::new(reason)),
    }
}

/// Success entry point handed to the executor. Consumed on use.
pub struct Resolver<T, E> {
    future: SettlableFuture<T, E>,
}

/// Failure entry point handed to the executor. Consumed on use.
pub struct Rejector<T, E> {
    future: SettlableFuture<T, E>,
}

impl<T, E> Resolver<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Fulfills the future with `value`, unless it has already settled.
    pub fn resolve(self, value: T) {
        self.future.settle_fulfilled(Arc::new(value));
    }
}

impl<T, E> Rejector<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Rejects the future with `reason`, unless it has already settled.
    pub fn reject(self, reason: E) {
        self.future.settle_rejected(Arc::new(reason));
    }
}

impl<T, E> Drop for Resolver<T, E> {
    fn drop(&mut self) {
        release_settler(&self.future.inner);
    }
}

impl<T, E> Drop for Rejector<T, E> {
    fn drop(&mut self) {
        release_settler(&self.future.inner);
    }
}

/// If the last settlement handle goes away while the future is still
/// pending, nothing can ever settle it; wake the awaiters so they observe
/// [`Error::SettlersDropped`] instead of hanging.
fn release_settler<T, E>(inner: &Mutex<Inner<T, E>>) {
    let wakers = {
        let mut inner = inner.lock().unwrap();
        inner.live_settlers -= 1;
        if inner.live_settlers == 0 && matches!(inner.slot, Slot::Pending) {
            inner.abandoned = true;
            mem::take(&mut inner.wakers)
        } else {
            Vec::new()
        }
    };
    for waker in wakers {
        waker.wake();
    }
}

impl<T, E> Future for SettlableFuture<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    type Output = Result<Settlement<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match &inner.slot {
            Slot::Fulfilled(value) => Poll::Ready(Ok(Settlement::Fulfilled(value.clone()))),
            Slot::Rejected(reason) => Poll::Ready(Ok(Settlement::Rejected(reason.clone()))),
            Slot::Pending if inner.abandoned => Poll::Ready(Err(Error::SettlersDropped)),
            Slot::Pending => {
                inner.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
