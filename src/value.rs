use crate::Promise;
use std::fmt;

/// The untyped payload a promise fulfills or rejects with.
///
/// A `Value::Promise` returned from a handler is adopted by the chained
/// promise. No other variant is ever treated as a promise.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Promise(Promise),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(promise) => Some(promise),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Promise(promise) => write!(f, "[promise #{}]", promise.id()),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use crate::Promise;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(2), Value::Number(2.0));
        assert_eq!(Value::from("boom").as_str().map(str::len), Some(4));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(()), Value::Undefined);
        assert_eq!(
            Value::List(vec![1.into(), "a".into()]).to_string(),
            "1,a"
        );
    }

    #[test]
    fn accessors_match_only_their_variant() {
        assert!(Value::default().is_undefined());
        assert!(!Value::Null.is_undefined());
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(1).as_bool(), None);
        assert_eq!(Value::from("1").as_number(), None);

        let all = Promise::all([Value::from(1), "two".into()]);
        crate::EventLoop::current().run().unwrap();
        let value = all.outcome().and_then(Result::ok).unwrap_or_default();
        let items = value.as_list().unwrap_or_default();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_str(), Some("two"));

        let promise = Promise::resolve(3);
        assert_eq!(Value::from(promise.clone()).as_promise(), Some(&promise));
        assert_eq!(Value::from(3).as_promise(), None);
    }

    #[test]
    fn promises_compare_by_identity() {
        let a = Promise::resolve(1);
        let b = Promise::resolve(1);
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }
}
