use crate::{EventLoop, Value};
use std::{
    cell::{Cell, RefCell},
    fmt, mem,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::trace;

type Handler = Box<dyn FnOnce(Value) -> Result<Value, Value>>;

/// Runs once with the outcome of the promise it is registered on.
pub(crate) type Reaction = Box<dyn FnOnce(Result<Value, Value>)>;

/// Snapshot of a promise's state.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

enum Status {
    Pending(Vec<Reaction>),
    Settled(Result<Value, Value>),
}

struct Inner {
    id: u64,
    status: RefCell<Status>,
}

thread_local! {
    /// Waiters of dropped pending promises not yet released. `Some` while a
    /// release is in progress on this thread.
    static RELEASED: RefCell<Option<Vec<Reaction>>> = const { RefCell::new(None) };
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Status::Pending(waiters) = self.status.get_mut() {
            if !waiters.is_empty() {
                release(mem::take(waiters));
            }
        }
    }
}

/// Drop `waiters` without recursing. A waiter owns the capabilities of the
/// promise it feeds, so dropping one can drop another pending promise; those
/// waiters join the worklist of the outermost release.
fn release(waiters: Vec<Reaction>) {
    let outermost = RELEASED.try_with(|released| {
        let mut released = released.borrow_mut();
        match released.as_mut() {
            Some(worklist) => {
                worklist.extend(waiters);
                false
            }
            None => {
                *released = Some(waiters);
                true
            }
        }
    });
    if !matches!(outermost, Ok(true)) {
        return;
    }
    loop {
        let batch = RELEASED.with(|released| {
            released
                .borrow_mut()
                .as_mut()
                .map(mem::take)
                .unwrap_or_default()
        });
        if batch.is_empty() {
            break;
        }
        drop(batch);
    }
    RELEASED.with(|released| *released.borrow_mut() = None);
}

/// The eventual outcome of an operation: pending, then fulfilled with a value
/// or rejected with a reason, exactly once.
///
/// Cloning a `Promise` clones the handle, not the outcome. Reactions run on
/// the thread's [`EventLoop`], never inside the call that registers them.
///
/// # Examples
///
/// ```
/// use promise_loop::{EventLoop, Promise, State};
///
/// let p = Promise::new(|fulfill, _| {
///     fulfill.fulfill(1);
///     Ok(())
/// })
/// .then(|v| Ok((v.as_number().unwrap_or_default() + 1.0).into()));
///
/// assert_eq!(p.state(), State::Pending);
/// EventLoop::current().run().unwrap();
/// assert_eq!(p.state(), State::Fulfilled(2.into()));
/// ```
#[derive(Clone)]
pub struct Promise {
    inner: Rc<Inner>,
}

/// Fulfills the promise it was created for. Only the first settlement of a
/// promise counts; later calls do nothing.
#[derive(Debug, Clone)]
pub struct Fulfill(Promise);

/// Rejects the promise it was created for. Only the first settlement of a
/// promise counts; later calls do nothing.
#[derive(Debug, Clone)]
pub struct Reject(Promise);

impl Fulfill {
    /// Fulfill with `value` as is. A promise passed here becomes the
    /// fulfillment value; it is not adopted. Fulfilling a promise with itself
    /// rejects it instead, so it never holds a handle to itself.
    pub fn fulfill(&self, value: impl Into<Value>) {
        match value.into() {
            Value::Promise(promise) if promise == self.0 => {
                trace!(id = self.0.id(), "fulfilled with itself");
                self.0.settle(Err(CYCLE.into()));
            }
            value => self.0.settle(Ok(value)),
        }
    }

    pub fn promise(&self) -> &Promise {
        &self.0
    }
}

impl Reject {
    pub fn reject(&self, reason: impl Into<Value>) {
        self.0.settle(Err(reason.into()));
    }

    pub fn promise(&self) -> &Promise {
        &self.0
    }
}

const CYCLE: &str = "chaining cycle detected for promise";

fn next_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

fn identity(value: Value) -> Result<Value, Value> {
    Ok(value)
}

fn rethrow(reason: Value) -> Result<Value, Value> {
    Err(reason)
}

impl Promise {
    /// Create a promise and run `executor` with its capabilities before
    /// returning. An `Err` from the executor rejects the promise unless the
    /// executor already settled it.
    pub fn new<F>(executor: F) -> Promise
    where
        F: FnOnce(Fulfill, Reject) -> Result<(), Value>,
    {
        let (promise, fulfill, reject) = Promise::with_resolvers();
        if let Err(reason) = executor(fulfill, reject.clone()) {
            trace!(id = promise.id(), %reason, "executor failed");
            reject.reject(reason);
        }
        promise
    }

    /// A pending promise together with its capabilities, for settling it
    /// from outside.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_loop::{Promise, State};
    /// let (promise, fulfill, _reject) = Promise::with_resolvers();
    /// assert_eq!(promise.state(), State::Pending);
    /// fulfill.fulfill("🍓");
    /// assert_eq!(promise.state(), State::Fulfilled("🍓".into()));
    /// ```
    pub fn with_resolvers() -> (Promise, Fulfill, Reject) {
        let promise = Promise {
            inner: Rc::new(Inner {
                id: next_id(),
                status: RefCell::new(Status::Pending(Vec::new())),
            }),
        };
        trace!(id = promise.id(), "promise created");
        (promise.clone(), Fulfill(promise.clone()), Reject(promise))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> State {
        match &*self.inner.status.borrow() {
            Status::Pending(_) => State::Pending,
            Status::Settled(Ok(value)) => State::Fulfilled(value.clone()),
            Status::Settled(Err(reason)) => State::Rejected(reason.clone()),
        }
    }

    /// `Ok` with the value or `Err` with the reason, once settled.
    pub fn outcome(&self) -> Option<Result<Value, Value>> {
        match &*self.inner.status.borrow() {
            Status::Pending(_) => None,
            Status::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.inner.status.borrow(), Status::Pending(_))
    }

    /// Chain a fulfillment handler. Rejections pass through unchanged.
    pub fn then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.chain(Box::new(on_fulfilled), Box::new(rethrow))
    }

    /// Chain a handler for each outcome. Whichever runs decides the outcome of
    /// the returned promise: `Err` rejects it, a returned `Value::Promise` is
    /// adopted, anything else fulfills it.
    pub fn then_with<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.chain(Box::new(on_fulfilled), Box::new(on_rejected))
    }

    /// Chain a rejection handler. Fulfillments pass through unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Promise
    where
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.chain(Box::new(identity), Box::new(on_rejected))
    }

    /// Run `on_finally` on either outcome, then settle the same way this
    /// promise did. If `on_finally` fails, or returns a promise that rejects,
    /// that reason wins instead.
    pub fn finally<F>(&self, on_finally: F) -> Promise
    where
        F: FnOnce() -> Result<Value, Value> + 'static,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(on_finally)));
        let on_rejected = Rc::clone(&on_fulfilled);
        self.chain(
            Box::new(move |value| run_finally(on_fulfilled.take(), Ok(value))),
            Box::new(move |reason| run_finally(on_rejected.take(), Err(reason))),
        )
    }

    /// Mirror this promise's eventual outcome onto another promise's
    /// capabilities.
    pub(crate) fn forward(&self, fulfill: Fulfill, reject: Reject) {
        self.then_with(
            move |value| {
                fulfill.fulfill(value);
                Ok(Value::Undefined)
            },
            move |reason| {
                reject.reject(reason);
                Ok(Value::Undefined)
            },
        );
    }

    /// Register `reaction` to run with the outcome. While pending it joins the
    /// waiters; once settled it is scheduled straight away.
    pub(crate) fn subscribe(&self, reaction: Reaction) {
        let outcome = match &mut *self.inner.status.borrow_mut() {
            Status::Pending(waiters) => {
                waiters.push(reaction);
                trace!(id = self.id(), waiters = waiters.len(), "waiter registered");
                return;
            }
            Status::Settled(outcome) => outcome.clone(),
        };
        trace!(id = self.id(), "already settled, scheduling reaction");
        EventLoop::current().schedule(move || reaction(outcome), Duration::ZERO);
    }

    fn chain(&self, on_fulfilled: Handler, on_rejected: Handler) -> Promise {
        let (derived, fulfill, reject) = Promise::with_resolvers();
        trace!(source = self.id(), derived = derived.id(), "chained");
        self.subscribe(Box::new(move |outcome| {
            let result = match outcome {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            };
            match result {
                Ok(Value::Promise(next)) if next == *fulfill.promise() => reject.reject(CYCLE),
                Ok(Value::Promise(next)) => next.forward(fulfill, reject),
                Ok(value) => fulfill.fulfill(value),
                Err(reason) => reject.reject(reason),
            }
        }));
        derived
    }

    fn settle(&self, outcome: Result<Value, Value>) {
        let waiters = {
            let mut status = self.inner.status.borrow_mut();
            let Status::Pending(waiters) = &mut *status else {
                trace!(id = self.id(), "already settled, ignoring");
                return;
            };
            let waiters = mem::take(waiters);
            *status = Status::Settled(outcome.clone());
            waiters
        };
        trace!(
            id = self.id(),
            fulfilled = outcome.is_ok(),
            waiters = waiters.len(),
            "promise settled"
        );
        if waiters.is_empty() {
            return;
        }
        EventLoop::current().schedule(
            move || {
                for waiter in waiters {
                    waiter(outcome.clone());
                }
            },
            Duration::ZERO,
        );
    }
}

fn run_finally<F>(on_finally: Option<F>, outcome: Result<Value, Value>) -> Result<Value, Value>
where
    F: FnOnce() -> Result<Value, Value>,
{
    match on_finally.map(|f| f()) {
        Some(Err(reason)) => Err(reason),
        Some(Ok(Value::Promise(pending))) => Ok(Value::Promise(pending.then(move |_| outcome))),
        _ => outcome,
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.status.try_borrow().as_deref() {
            Ok(Status::Pending(_)) => "pending",
            Ok(Status::Settled(Ok(_))) => "fulfilled",
            Ok(Status::Settled(Err(_))) => "rejected",
            Err(_) => "settling",
        };
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("state", &state)
            .finish()
    }
}
