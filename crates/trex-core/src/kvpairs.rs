//! An ordered key/value list in which a key may carry several values.

/// Ordered multi-valued key/value pairs.
///
/// Values of the same key are indexed in insertion order. A plain lookup returns the most
/// recently pushed value, so pushing a key again shadows earlier values.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct KvPairs {
    inner: Vec<(String, String)>,
}

impl KvPairs {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value to `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.push((key.into(), value.into()));
    }

    /// Returns the most recently pushed value of `key`.
    pub fn get<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.values(key).last()
    }

    /// Returns the `n`-th value of `key`.
    pub fn get_nth<'a>(&'a self, key: &'a str, n: usize) -> Option<&'a str> {
        self.values(key).nth(n)
    }

    /// Returns the number of values of `key`.
    pub fn count(&self, key: &str) -> usize {
        self.values(key).count()
    }

    /// Iterates over the values of `key` in insertion order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Appends every pair of `other`.
    pub fn extend_from(&mut self, other: &KvPairs) {
        self.inner.extend(other.inner.iter().cloned());
    }

    /// Iterates over all pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `true` if there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for KvPairs
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_values_shadow_earlier_ones() {
        let mut kv = KvPairs::new();
        kv.push("A", "1");
        kv.push("B", "x");
        kv.push("A", "2");
        assert_eq!(kv.get("A"), Some("2"));
        assert_eq!(kv.get_nth("A", 0), Some("1"));
        assert_eq!(kv.get_nth("A", 1), Some("2"));
        assert_eq!(kv.get_nth("A", 2), None);
        assert_eq!(kv.count("A"), 2);
        assert_eq!(kv.count("C"), 0);
    }
}
