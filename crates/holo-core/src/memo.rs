//! Last-parameters caches.
//!
//! Each pattern source remembers the parameters of its last successful
//! generation together with the result. Asking again with equal parameters
//! returns the stored pattern; anything else regenerates and replaces it.

/// Single-entry cache keyed on the parameters that produced the value.
#[derive(Debug, Clone)]
pub struct Memo<K, V> {
    entry: Option<(K, V)>,
    misses: usize,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            entry: None,
            misses: 0,
        }
    }
}

impl<K: PartialEq, V> Memo<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, computing it with `build` if the key
    /// differs from the stored one. A failed build leaves the cache untouched.
    pub fn get_or_try_insert<E>(
        &mut self,
        key: K,
        build: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<&V, E> {
        let entry = match self.entry.take() {
            Some((cached, value)) if cached == key => (cached, value),
            previous => match build(&key) {
                Ok(value) => {
                    self.misses += 1;
                    (key, value)
                }
                Err(e) => {
                    self.entry = previous;
                    return Err(e);
                }
            },
        };
        let (_, value) = self.entry.insert(entry);
        Ok(&*value)
    }

    /// Key of the cached entry.
    pub fn key(&self) -> Option<&K> {
        self.entry.as_ref().map(|(k, _)| k)
    }

    pub fn value(&self) -> Option<&V> {
        self.entry.as_ref().map(|(_, v)| v)
    }

    /// Number of times the value had to be rebuilt.
    pub fn misses(&self) -> usize {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_key_hits() {
        let mut memo: Memo<(u32, u32), u64> = Memo::new();
        let mut calls = 0;
        for _ in 0..3 {
            let v = memo
                .get_or_try_insert((2, 3), |&(a, b)| {
                    calls += 1;
                    Ok::<_, ()>((a * b) as u64)
                })
                .unwrap();
            assert_eq!(*v, 6);
        }
        assert_eq!(calls, 1);
        assert_eq!(memo.misses(), 1);
    }

    #[test]
    fn test_changed_key_rebuilds() {
        let mut memo: Memo<f64, f64> = Memo::new();
        memo.get_or_try_insert(1.0, |k| Ok::<_, ()>(k * 2.0)).unwrap();
        let v = *memo.get_or_try_insert(4.0, |k| Ok::<_, ()>(k * 2.0)).unwrap();
        assert_eq!(v, 8.0);
        assert_eq!(memo.key(), Some(&4.0));
        assert_eq!(memo.misses(), 2);
    }

    #[test]
    fn test_failed_build_keeps_previous_entry() {
        let mut memo: Memo<u8, &str> = Memo::new();
        memo.get_or_try_insert(1, |_| Ok::<_, &str>("one")).unwrap();
        let err = memo.get_or_try_insert(2, |_| Err("boom"));
        assert_eq!(err, Err("boom"));
        assert_eq!(memo.key(), Some(&1));
        assert_eq!(memo.value(), Some(&"one"));
    }
}
