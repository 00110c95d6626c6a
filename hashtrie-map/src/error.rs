use core::fmt;

/// Error returned by [`HashTrieMap::try_insert`](crate::HashTrieMap::try_insert)
/// when the key is already present.
///
/// Hands back everything that was passed in, plus a clone of the value the
/// map already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedError<K, V> {
    /// The key that was not inserted.
    pub key: K,
    /// The value that was not inserted.
    pub value: V,
    /// The value stored for `key` when the insert was rejected.
    pub existing: V,
}

impl<K, V> OccupiedError<K, V> {
    /// Splits the error into the rejected key and value.
    pub fn into_inner(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Display for OccupiedError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key {:?} already holds {:?}, rejected {:?}",
            self.key, self.existing, self.value
        )
    }
}

impl<K: fmt::Debug, V: fmt::Debug> std::error::Error for OccupiedError<K, V> {}
