//! Awaiting a promise from async code.
//!
use crate::{Promise, Value};
use std::{
    cell::RefCell,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// The future a [`Promise`] turns into when awaited. Resolves to `Ok` with the
/// fulfillment value or `Err` with the rejection reason.
///
/// The outcome is delivered by a task on the thread's
/// [`EventLoop`](crate::EventLoop), so the future must be driven by
/// [`EventLoop::block_on`](crate::EventLoop::block_on) or by an executor that
/// also runs that loop.
///
/// # Examples
///
/// ```
/// use promise_loop::{EventLoop, Promise};
/// use std::time::Duration;
///
/// let promise = Promise::resolve_delay("Hi", Duration::from_millis(5));
/// let received = EventLoop::current().block_on(async { promise.await });
/// assert_eq!(received, Ok(Ok("Hi".into())));
/// ```
#[derive(Debug)]
pub struct Consumer {
    promise: Promise,
    inner: Rc<RefCell<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    value: Option<Result<Value, Value>>,
    waker: Option<Waker>,
    subscribed: bool,
}

impl IntoFuture for Promise {
    type Output = Result<Value, Value>;
    type IntoFuture = Consumer;

    fn into_future(self) -> Consumer {
        Consumer {
            promise: self,
            inner: Rc::default(),
        }
    }
}

impl Future for Consumer {
    type Output = Result<Value, Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.inner.borrow_mut();
        if let Some(value) = inner.value.take() {
            return Poll::Ready(value);
        }
        inner.waker = Some(cx.waker().clone());
        if !inner.subscribed {
            inner.subscribed = true;
            drop(inner);
            let slot = Rc::clone(&this.inner);
            this.promise.subscribe(Box::new(move |outcome| {
                let mut inner = slot.borrow_mut();
                inner.value = Some(outcome);
                if let Some(waker) = inner.waker.take() {
                    waker.wake()
                }
            }));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, EventLoop, Promise};
    use futures::future::join;
    use std::{future::IntoFuture, time::Duration};

    #[test_log::test]
    fn await_fulfilled() {
        let (promise, fulfill, _) = Promise::with_resolvers();
        fulfill.fulfill("🍓");
        let received = EventLoop::current().block_on(promise.into_future());
        assert_eq!(received, Ok(Ok("🍓".into())));
    }

    #[test_log::test]
    fn await_rejected() {
        let promise = Promise::reject_delay("💥", Duration::from_millis(5));
        let received = EventLoop::current().block_on(async move { promise.await });
        assert_eq!(received, Ok(Err("💥".into())));
    }

    #[test_log::test]
    fn two_consumers_of_one_promise() {
        let promise = Promise::resolve_delay(1, Duration::from_millis(5));
        let a = promise.clone();
        let b = promise;
        let received = EventLoop::current().block_on(join(a.into_future(), b.into_future()));
        assert_eq!(received, Ok((Ok(1.into()), Ok(1.into()))));
    }

    #[test_log::test]
    fn unresolved_promise_stalls() {
        let (promise, _fulfill, _reject) = Promise::with_resolvers();
        let received = EventLoop::current().block_on(promise.into_future());
        assert_eq!(received, Err(Error::Stalled));
    }
}
