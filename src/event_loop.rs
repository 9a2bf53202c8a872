//! The deferred-callback primitive promises run their reactions on.
//!
//! Every thread has exactly one [`EventLoop`], created on first use. Nothing
//! scheduled on it runs until the thread calls [`EventLoop::run`],
//! [`EventLoop::run_once`] or [`EventLoop::block_on`], so a task never runs
//! inside the call that scheduled it.
use crate::{Config, Error, ZeroDelay};
use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    future::Future,
    mem,
    pin::pin,
    rc::Rc,
    sync::{
        atomic::{self, AtomicBool},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, trace};

type Task = Box<dyn FnOnce()>;

thread_local! {
    static EVENT_LOOP: EventLoop = EventLoop::with_config(Config::default());
}

struct Timer {
    deadline: Instant,
    seq: u64,
    immediate: bool,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed: `BinaryHeap` is a max-heap and the earliest deadline must pop
    // first. Equal deadlines pop in submission order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Next {
    Run(Task),
    Sleep(Instant),
    Idle,
}

#[derive(Default)]
struct Queue {
    config: Config,
    ready: VecDeque<Task>,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
}

impl Queue {
    fn push(&mut self, task: Task, delay: Duration) {
        if delay.is_zero() && self.config.zero_delay == ZeroDelay::Queue {
            self.ready.push_back(task);
            trace!(ready = self.ready.len(), "queued task");
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Timer {
            deadline: Instant::now() + delay,
            seq,
            immediate: delay.is_zero(),
            task,
        });
        trace!(seq, ?delay, "queued timer");
    }

    /// Switching to `ZeroDelay::Queue` moves zero-delay timers to the ready
    /// queue, since it drains before any timer and later zero-delay tasks
    /// must not overtake them.
    fn reconfigure(&mut self, config: Config) {
        let requeue = config.zero_delay == ZeroDelay::Queue
            && self.timers.iter().any(|timer| timer.immediate);
        if requeue {
            let (mut immediate, delayed): (Vec<_>, Vec<_>) = mem::take(&mut self.timers)
                .into_iter()
                .partition(|timer| timer.immediate);
            immediate.sort_by_key(|timer| timer.seq);
            trace!(moved = immediate.len(), "zero-delay timers requeued");
            self.ready.extend(immediate.into_iter().map(|timer| timer.task));
            self.timers = delayed.into_iter().collect();
        }
        self.config = config;
    }

    fn next(&mut self, now: Instant) -> Next {
        if let Some(task) = self.ready.pop_front() {
            return Next::Run(task);
        }
        if self.timers.peek().is_some_and(|timer| timer.deadline <= now) {
            if let Some(timer) = self.timers.pop() {
                trace!(seq = timer.seq, "timer fired");
                return Next::Run(timer.task);
            }
        }
        match self.timers.peek() {
            Some(timer) => Next::Sleep(timer.deadline),
            None => Next::Idle,
        }
    }

    fn len(&self) -> usize {
        self.ready.len() + self.timers.len()
    }
}

struct Shared {
    queue: RefCell<Queue>,
    running: Cell<bool>,
}

/// Resets the running flag when a run ends, including by unwinding.
struct Running<'a>(&'a Cell<bool>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A single-threaded task queue with timers.
///
/// Zero-delay tasks run in submission order. Delayed tasks run no earlier than
/// their delay, ordered by deadline and then by submission.
///
/// # Examples
///
/// ```
/// use promise_loop::EventLoop;
/// use std::{cell::RefCell, rc::Rc, time::Duration};
///
/// let event_loop = EventLoop::current();
/// let seen = Rc::new(RefCell::new(vec![]));
/// for n in [1, 2, 3] {
///     let seen = seen.clone();
///     event_loop.schedule(move || seen.borrow_mut().push(n), Duration::ZERO);
/// }
/// assert!(seen.borrow().is_empty());
/// assert_eq!(event_loop.run(), Ok(3));
/// assert_eq!(*seen.borrow(), vec![1, 2, 3]);
/// ```
#[derive(Clone)]
pub struct EventLoop {
    shared: Rc<Shared>,
}

impl EventLoop {
    /// The event loop of the calling thread.
    pub fn current() -> Self {
        EVENT_LOOP.with(Clone::clone)
    }

    fn with_config(config: Config) -> Self {
        Self {
            shared: Rc::new(Shared {
                queue: RefCell::new(Queue {
                    config,
                    ..Queue::default()
                }),
                running: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> Config {
        self.shared.queue.borrow().config.clone()
    }

    /// Replace the configuration. Tasks already queued still run before any
    /// zero-delay task scheduled after the change.
    pub fn set_config(&self, config: Config) {
        debug!(?config, "event loop configured");
        self.shared.queue.borrow_mut().reconfigure(config);
    }

    /// Run `task` after the current turn, and no earlier than `delay` from now.
    pub fn schedule<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce() + 'static,
    {
        self.shared.queue.borrow_mut().push(Box::new(task), delay);
    }

    /// Number of tasks and timers waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Run a single task, sleeping until the next timer is due if nothing
    /// else is queued. Returns `false` once there is nothing left to run.
    pub fn run_once(&self) -> Result<bool, Error> {
        let _running = self.enter()?;
        Ok(self.turn())
    }

    /// Run tasks until none are left, returning how many ran.
    pub fn run(&self) -> Result<usize, Error> {
        let _running = self.enter()?;
        let mut count = 0;
        while self.turn() {
            count += 1;
        }
        debug!(tasks = count, "event loop drained");
        Ok(count)
    }

    /// Drive `future` to completion, running queued tasks whenever it is
    /// pending.
    ///
    /// Fails with [`Error::Stalled`] if the future is still pending when the
    /// loop has nothing left to run, since nothing could ever wake it.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, Error>
    where
        F: Future,
    {
        let _running = self.enter()?;
        let mut future = pin!(future);

        let waker_impl = Arc::new(LoopWaker::new());
        let waker = Waker::from(Arc::clone(&waker_impl));
        let mut cx = Context::from_waker(&waker);

        loop {
            if waker_impl.take_awake() {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
            }
            if !self.turn() && !waker_impl.awake() {
                debug!("event loop stalled with the future still pending");
                return Err(Error::Stalled);
            }
        }
    }

    fn enter(&self) -> Result<Running<'_>, Error> {
        if self.shared.running.replace(true) {
            return Err(Error::Reentrant);
        }
        Ok(Running(&self.shared.running))
    }

    fn turn(&self) -> bool {
        loop {
            let next = self.shared.queue.borrow_mut().next(Instant::now());
            match next {
                Next::Run(task) => {
                    task();
                    return true;
                }
                Next::Sleep(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        trace!(wait = ?(deadline - now), "sleeping until next timer");
                        thread::sleep(deadline - now);
                    }
                }
                Next::Idle => return false,
            }
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EventLoop");
        debug.field("running", &self.shared.running.get());
        match self.shared.queue.try_borrow() {
            Ok(queue) => debug
                .field("config", &queue.config)
                .field("ready", &queue.ready.len())
                .field("timers", &queue.timers.len())
                .finish(),
            Err(_) => debug.finish_non_exhaustive(),
        }
    }
}

struct LoopWaker {
    awake: AtomicBool,
}

impl LoopWaker {
    fn new() -> Self {
        Self {
            awake: AtomicBool::new(true),
        }
    }

    #[inline]
    fn awake(&self) -> bool {
        self.awake.load(atomic::Ordering::Relaxed)
    }

    #[inline]
    fn take_awake(&self) -> bool {
        self.awake.swap(false, atomic::Ordering::Relaxed)
    }
}

impl Wake for LoopWaker {
    fn wake(self: Arc<Self>) {
        self.awake.store(true, atomic::Ordering::Relaxed);
    }
}
