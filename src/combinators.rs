//! Factory and aggregate promises built on `then` wiring.
use crate::{EventLoop, Promise, Value};
use std::{cell::RefCell, mem, rc::Rc, time::Duration};
use tracing::trace;

/// Index-aligned slots for an aggregate, filled as inputs settle.
struct Slots {
    values: Vec<Value>,
    filled: usize,
}

impl Slots {
    fn new(len: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Slots {
            values: vec![Value::Undefined; len],
            filled: 0,
        }))
    }

    /// Store `value` at `index`; returns every value once all slots are filled.
    fn fill(&mut self, index: usize, value: Value) -> Option<Vec<Value>> {
        self.values[index] = value;
        self.filled += 1;
        (self.filled == self.values.len()).then(|| mem::take(&mut self.values))
    }
}

fn normalize<I>(items: I) -> Vec<Promise>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    items.into_iter().map(Promise::resolve).collect()
}

impl Promise {
    /// A promise fulfilled with `value`, or one that adopts `value` if it is
    /// itself a promise.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_loop::{EventLoop, Promise, State};
    /// let later = Promise::resolve(Promise::reject("no"));
    /// EventLoop::current().run().unwrap();
    /// assert_eq!(later.state(), State::Rejected("no".into()));
    /// ```
    pub fn resolve(value: impl Into<Value>) -> Promise {
        match value.into() {
            Value::Promise(source) => Promise::new(|fulfill, reject| {
                source.forward(fulfill, reject);
                Ok(())
            }),
            value => Promise::new(|fulfill, _| {
                fulfill.fulfill(value);
                Ok(())
            }),
        }
    }

    /// A promise rejected with `reason`.
    pub fn reject(reason: impl Into<Value>) -> Promise {
        let reason = reason.into();
        Promise::new(|_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Like [`Promise::resolve`], but settles no earlier than `delay` from now.
    pub fn resolve_delay(value: impl Into<Value>, delay: Duration) -> Promise {
        let value = value.into();
        Promise::new(|fulfill, reject| {
            EventLoop::current().schedule(
                move || match value {
                    Value::Promise(source) => source.forward(fulfill, reject),
                    value => fulfill.fulfill(value),
                },
                delay,
            );
            Ok(())
        })
    }

    /// Rejects with `reason` no earlier than `delay` from now.
    pub fn reject_delay(reason: impl Into<Value>, delay: Duration) -> Promise {
        let reason = reason.into();
        Promise::new(|_, reject| {
            EventLoop::current().schedule(move || reject.reject(reason), delay);
            Ok(())
        })
    }

    /// Fulfills with a `List` of every item's value, in input order, once all
    /// of them fulfill. The first rejection rejects the aggregate.
    ///
    /// Items that are not promises count as already fulfilled.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_loop::{EventLoop, Promise, State, Value};
    /// use std::time::Duration;
    ///
    /// let all = Promise::all([
    ///     Value::from(Promise::resolve_delay(1, Duration::from_millis(10))),
    ///     Value::from(2),
    /// ]);
    /// EventLoop::current().run().unwrap();
    /// assert_eq!(all.state(), State::Fulfilled(Value::List(vec![1.into(), 2.into()])));
    /// ```
    pub fn all<I>(items: I) -> Promise
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let items = normalize(items);
        let (aggregate, fulfill, reject) = Promise::with_resolvers();
        trace!(id = aggregate.id(), items = items.len(), "all");
        if items.is_empty() {
            fulfill.fulfill(Vec::<Value>::new());
            return aggregate;
        }

        let slots = Slots::new(items.len());
        for (index, item) in items.iter().enumerate() {
            let slots = Rc::clone(&slots);
            let fulfill = fulfill.clone();
            let reject = reject.clone();
            item.then_with(
                move |value| {
                    if let Some(values) = slots.borrow_mut().fill(index, value) {
                        fulfill.fulfill(values);
                    }
                    Ok(Value::Undefined)
                },
                move |reason| {
                    reject.reject(reason);
                    Ok(Value::Undefined)
                },
            );
        }
        aggregate
    }

    /// Settles the same way as whichever item settles first. With no items it
    /// never settles.
    pub fn race<I>(items: I) -> Promise
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let items = normalize(items);
        let (winner, fulfill, reject) = Promise::with_resolvers();
        trace!(id = winner.id(), items = items.len(), "race");
        for item in &items {
            item.forward(fulfill.clone(), reject.clone());
        }
        winner
    }

    /// Fulfills with the first item to fulfill. If every item rejects, rejects
    /// with a `List` of the reasons in input order.
    pub fn any<I>(items: I) -> Promise
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let items = normalize(items);
        let (first, fulfill, reject) = Promise::with_resolvers();
        trace!(id = first.id(), items = items.len(), "any");
        if items.is_empty() {
            reject.reject(Vec::<Value>::new());
            return first;
        }

        let slots = Slots::new(items.len());
        for (index, item) in items.iter().enumerate() {
            let slots = Rc::clone(&slots);
            let fulfill = fulfill.clone();
            let reject = reject.clone();
            item.then_with(
                move |value| {
                    fulfill.fulfill(value);
                    Ok(Value::Undefined)
                },
                move |reason| {
                    if let Some(reasons) = slots.borrow_mut().fill(index, reason) {
                        reject.reject(reasons);
                    }
                    Ok(Value::Undefined)
                },
            );
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use crate::{EventLoop, Promise, State, Value};
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn settled(promise: &Promise) -> State {
        EventLoop::current().run().unwrap();
        promise.state()
    }

    #[test_log::test]
    fn resolve_wraps_plain_values() {
        let p = Promise::resolve("hi");
        assert_eq!(p.state(), State::Fulfilled("hi".into()));
    }

    #[test_log::test]
    fn resolve_adopts_promises() {
        let source = Promise::resolve_delay(5, ms(5));
        let p = Promise::resolve(source.clone());
        assert_ne!(p, source);
        assert_eq!(p.state(), State::Pending);
        assert_eq!(settled(&p), State::Fulfilled(5.into()));
        assert_eq!(settled(&p), source.state());
    }

    #[test_log::test]
    fn delayed_factories_wait() {
        let started = std::time::Instant::now();
        let ok = Promise::resolve_delay(1, ms(15));
        let err = Promise::reject_delay("late", ms(5));
        assert_eq!(ok.state(), State::Pending);
        assert_eq!(err.state(), State::Pending);
        EventLoop::current().run().unwrap();
        assert!(started.elapsed() >= ms(15));
        assert_eq!(ok.state(), State::Fulfilled(1.into()));
        assert_eq!(err.state(), State::Rejected("late".into()));
    }

    #[test_log::test]
    fn resolve_delay_adopts_after_the_delay() {
        let p = Promise::resolve_delay(Promise::reject("inner"), ms(5));
        assert_eq!(settled(&p), State::Rejected("inner".into()));
    }

    #[test_log::test]
    fn all_orders_by_input_not_completion() {
        let p = Promise::all([
            Value::from(Promise::resolve_delay("slow", ms(30))),
            Value::from(Promise::resolve_delay("fast", ms(5))),
            Value::from("now"),
        ]);
        assert_eq!(
            settled(&p),
            State::Fulfilled(Value::List(vec!["slow".into(), "fast".into(), "now".into()]))
        );
    }

    #[test_log::test]
    fn all_rejects_with_first_rejection() {
        let p = Promise::all([
            Value::from(Promise::reject_delay("second", ms(20))),
            Value::from(Promise::reject_delay("first", ms(5))),
            Value::from(Promise::resolve(1)),
        ]);
        assert_eq!(settled(&p), State::Rejected("first".into()));
    }

    #[test_log::test]
    fn all_of_nothing_is_an_empty_list() {
        let p = Promise::all(Vec::<Value>::new());
        assert_eq!(settled(&p), State::Fulfilled(Value::List(vec![])));
    }

    #[test_log::test]
    fn race_takes_the_first_settlement() {
        let p = Promise::race([
            Promise::resolve_delay(1, ms(30)),
            Promise::reject_delay("quick", ms(5)),
        ]);
        assert_eq!(settled(&p), State::Rejected("quick".into()));

        let p = Promise::race([
            Promise::reject_delay("slow", ms(30)),
            Promise::resolve_delay(2, ms(5)),
        ]);
        assert_eq!(settled(&p), State::Fulfilled(2.into()));
    }

    #[test_log::test]
    fn race_of_nothing_never_settles() {
        let p = Promise::race(Vec::<Value>::new());
        assert_eq!(settled(&p), State::Pending);
    }

    #[test_log::test]
    fn any_takes_the_first_fulfillment() {
        let p = Promise::any([
            Value::from(Promise::reject("no")),
            Value::from(Promise::resolve_delay("yes", ms(5))),
            Value::from(Promise::resolve_delay("later", ms(20))),
        ]);
        assert_eq!(settled(&p), State::Fulfilled("yes".into()));
    }

    #[test_log::test]
    fn any_collects_reasons_when_everything_rejects() {
        let p = Promise::any([
            Promise::reject_delay("a", ms(10)),
            Promise::reject("b"),
        ]);
        assert_eq!(
            settled(&p),
            State::Rejected(Value::List(vec!["a".into(), "b".into()]))
        );

        let p = Promise::any(Vec::<Value>::new());
        assert_eq!(settled(&p), State::Rejected(Value::List(vec![])));
    }
}
