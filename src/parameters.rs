//! Bind parameter normalization.
//!
//! Callers hand over loosely-shaped [`Params`]: nothing, a single scalar, a
//! list of arguments (where a list argument is spread into positional binds)
//! or a single name/value mapping. [`Params::normalize`] turns that into a
//! [`BindSet`] the statement layer can bind without further checks on shape.

use std::collections::{BTreeMap, HashMap};

use crate::exceptions::{Error, Result};
use crate::types::{Blob, Value};

/// One raw bind argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    /// A list of scalars spread over consecutive positional placeholders.
    Array(Vec<Param>),
    /// Name/value pairs for `:name`, `@name` or `$name` placeholders.
    Named(Vec<(String, Param)>),
}

impl Param {
    fn kind(&self) -> &'static str {
        match self {
            Param::Value(_) => "scalar",
            Param::Array(_) => "nested array",
            Param::Named(_) => "named mapping",
        }
    }
}

macro_rules! param_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Param {
            fn from(v: $ty) -> Self {
                Param::Value(Value::from(v))
            }
        })*
    };
}

param_from_scalar!(i8, i16, i32, i64, u8, u16, u32, bool, f32, f64, &str, String, Blob);

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Value(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        Param::Value(Value::from(value))
    }
}

/// The argument list of one execute/query call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new(args: Vec<Param>) -> Self {
        Params(args)
    }

    /// A single mapping argument.
    pub fn named<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Params(vec![Param::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Param::Value(v.into())))
                .collect(),
        )])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into a bind set.
    ///
    /// Fails with [`Error::Binding`] when named and positional arguments are
    /// mixed and with [`Error::UnsupportedType`] when an argument is nested
    /// deeper than one list level.
    pub fn normalize(self) -> Result<BindSet> {
        let mut args = self.0;
        if args.is_empty() {
            return Ok(BindSet::Empty);
        }
        if let [Param::Named(pairs)] = args.as_mut_slice() {
            let pairs = std::mem::take(pairs)
                .into_iter()
                .map(|(name, param)| Ok((name, scalar(param)?)))
                .collect::<Result<Vec<_>>>()?;
            return Ok(BindSet::Named(pairs));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Param::Value(value) => values.push(value),
                Param::Array(items) => {
                    for item in items {
                        values.push(scalar(item)?);
                    }
                }
                Param::Named(_) => {
                    return Err(Error::Binding(
                        "cannot mix named and positional parameters".to_string(),
                    ));
                }
            }
        }
        Ok(BindSet::Positional(values))
    }
}

fn scalar(param: Param) -> Result<Value> {
    match param {
        Param::Value(value) => Ok(value),
        other => Err(Error::UnsupportedType { kind: other.kind() }),
    }
}

/// Normalized bind values for one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum BindSet {
    Empty,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl BindSet {
    pub fn len(&self) -> usize {
        match self {
            BindSet::Empty => 0,
            BindSet::Positional(values) => values.len(),
            BindSet::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::default()
    }
}

impl From<Param> for Params {
    fn from(param: Param) -> Self {
        Params(vec![param])
    }
}

impl From<Vec<Param>> for Params {
    fn from(args: Vec<Param>) -> Self {
        Params(args)
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params(values.into_iter().map(Param::Value).collect())
    }
}

impl From<&[Value]> for Params {
    fn from(values: &[Value]) -> Self {
        Params(values.iter().cloned().map(Param::Value).collect())
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params(values.into_iter().map(Param::Value).collect())
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Params(vec![Param::Value(value)])
    }
}

macro_rules! params_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Params {
            fn from(v: $ty) -> Self {
                Params(vec![Param::Value(Value::from(v))])
            }
        })*
    };
}

params_from_scalar!(i32, i64, u32, f64, bool, &str, String, Blob);

impl<V: Into<Value>> From<HashMap<String, V>> for Params {
    fn from(map: HashMap<String, V>) -> Self {
        Params::named(map)
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Params {
    fn from(map: BTreeMap<String, V>) -> Self {
        Params::named(map)
    }
}

/// Build [`Params`] from a comma-separated argument list.
///
/// ```
/// use stepsqlite::{params, Param};
/// let p = params![1, "foo", Param::Array(vec![2.into(), 3.into()])];
/// assert!(!p.is_empty());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::default()
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::Params::new(vec![$($crate::Param::from($arg)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_bind_nothing() {
        assert_eq!(Params::from(()).normalize().unwrap(), BindSet::Empty);
        assert_eq!(params![].normalize().unwrap(), BindSet::Empty);
    }

    #[test]
    fn single_scalar_becomes_one_positional_bind() {
        assert_eq!(
            Params::from(100).normalize().unwrap(),
            BindSet::Positional(vec![Value::Integer(100)])
        );
    }

    #[test]
    fn array_argument_is_spread() {
        let p = params![Param::Array(vec![1.into(), "foo".into()])];
        assert_eq!(
            p.normalize().unwrap(),
            BindSet::Positional(vec![Value::Integer(1), Value::from("foo")])
        );
    }

    #[test]
    fn one_element_array_keeps_position_after_leading_scalar() {
        let p = params![1, Param::Array(vec!["foo".into()])];
        assert_eq!(
            p.normalize().unwrap(),
            BindSet::Positional(vec![Value::Integer(1), Value::from("foo")])
        );
    }

    #[test]
    fn nested_array_is_unsupported() {
        let p = params![Param::Array(vec![Param::Array(vec![1.into()])])];
        match p.normalize() {
            Err(Error::UnsupportedType { kind }) => assert_eq!(kind, "nested array"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mixing_styles_is_rejected() {
        let p = params![1, Param::Named(vec![("a".into(), 2.into())])];
        assert!(matches!(p.normalize(), Err(Error::Binding(_))));
    }

    #[test]
    fn named_mapping_keeps_pairs() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        assert_eq!(
            Params::from(map).normalize().unwrap(),
            BindSet::Named(vec![
                ("a".to_string(), Value::Integer(1)),
                ("b".to_string(), Value::Integer(2)),
            ])
        );
    }

    #[test]
    fn named_value_must_be_scalar() {
        let p = Params::from(Param::Named(vec![(
            "a".into(),
            Param::Array(vec![1.into()]),
        )]));
        assert!(matches!(
            p.normalize(),
            Err(Error::UnsupportedType { kind: "nested array" })
        ));
    }

    #[test]
    fn blob_marker_is_kept_as_blob() {
        assert_eq!(
            Params::from(Blob(vec![0, 1])).normalize().unwrap(),
            BindSet::Positional(vec![Value::Blob(vec![0, 1])])
        );
    }
}
