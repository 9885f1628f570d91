use std::collections::BTreeMap;

use corvusdb_api::Value;

/// Bound parameters for a Cypher query, referenced with `$name` syntax.
///
/// ```
/// use corvusdb::Params;
/// use corvusdb_api::Value;
///
/// let mut params = Params::new();
/// params.insert("name", Value::Str("Alice".into()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub(crate) inner: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(name.into(), value.into());
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Params { inner: iter.into_iter().collect() }
    }
}
