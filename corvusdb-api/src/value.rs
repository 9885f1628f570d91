use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::duration::Duration;
use crate::point::Point;
use crate::{EdgeRef, NodeRef, PathValue};

/// A time-of-day value, optionally carrying a UTC offset (openCypher's
/// `LocalTime` vs `Time`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeValue {
    pub time: NaiveTime,
    pub offset: Option<FixedOffset>,
}

/// The tagged value every property, expression result, and row column holds.
///
/// `Float` and `Distance` carry [`OrderedFloat`] so the variant as a whole can
/// derive `Eq`/`Hash` and participate in `DISTINCT`/grouping the same way a
/// plain scalar would; NaN compares equal to itself and sorts above all other
/// floats, which only matters for grouping, never for `ORDER BY` (see
/// [`order_compare`] in the query crate's evaluator, which applies the
/// spec's "incomparable yields no ordering" rule instead of this type's
/// total order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Date(NaiveDate),
    Time(TimeValue),
    DateTime(DateTime<FixedOffset>),
    Duration(Duration),
    Point(Point),
    Distance(OrderedFloat<f64>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Node(NodeRef),
    Edge(EdgeRef),
    Path(PathValue),
}

impl Eq for Duration {}

impl Value {
    pub fn float(f: f64) -> Value {
        Value::Float(OrderedFloat(f))
    }

    pub fn distance(meters: f64) -> Value {
        Value::Distance(OrderedFloat(meters))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(f.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::Point(_) => "point",
            Value::Distance(_) => "distance",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
            Value::Edge(_) => "edge",
            Value::Path(_) => "path",
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => {
                t.time.hash(state);
                t.offset.map(|o| o.local_minus_utc()).hash(state);
            }
            Value::DateTime(dt) => dt.hash(state),
            Value::Duration(d) => {
                d.months.hash(state);
                d.days.hash(state);
                d.seconds.hash(state);
                d.nanos.hash(state);
            }
            Value::Point(p) => {
                p.crs.hash(state);
                OrderedFloat(p.a).hash(state);
                OrderedFloat(p.b).hash(state);
                p.c.map(OrderedFloat).hash(state);
            }
            Value::Distance(d) => d.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(m) => {
                for (k, v) in m {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Value::Node(n) => n.id.hash(state),
            Value::Edge(e) => e.id.hash(state),
            Value::Path(p) => {
                for n in &p.nodes {
                    n.id.hash(state);
                }
                for e in &p.relationships {
                    e.id.hash(state);
                }
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_floats_hash_the_same() {
        use std::collections::hash_map::DefaultHasher;
        let a = Value::float(1.5);
        let b = Value::float(1.5);
        assert_eq!(a, b);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn null_is_distinct_type_from_everything() {
        assert_ne!(Value::Null, Value::Bool(false));
        assert_ne!(Value::Null, Value::Int(0));
    }
}
