use std::fmt::{Debug};
use std::hash::{Hash};
use std::marker::{PhantomData};

/**
 * Internally represented as a small integer that is usable as an array index.
 */
pub trait AsUsize: Debug + Copy + Hash + Eq {
    fn as_usize(self) -> usize;
}

/**
 * A map that is implemented as an array.
 * This is preferable to a HashMap when the keys are a small dense enum, such
 * as [`Element`].
 *
 * [`Element`]: crate::code::Element
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayMap<K: AsUsize, V>(
    Box<[V]>,
    PhantomData<K>,
);

impl<K: AsUsize, V> ArrayMap<K, V> {
    pub fn new(length: usize) -> Self where V: Default {
        Self::new_with(length, |_| Default::default())
    }

    /// Constructs an `ArrayMap` whose `i`th value is `f(i)`.
    pub fn new_with(length: usize, f: impl Fn(usize) -> V) -> Self {
        ArrayMap(
            (0..length).map(f).collect(),
            PhantomData,
        )
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn iter(&self) -> std::slice::Iter<V> { self.0.iter() }

    /// Returns the value for `key`, or `None` if `key` is out of range.
    pub fn get(&self, key: K) -> Option<&V> { self.0.get(key.as_usize()) }
}

impl<K: AsUsize, V> std::ops::Index<K> for ArrayMap<K, V> {
    type Output = V;

    fn index(&self, index: K) -> &V {
        &self.0[index.as_usize()]
    }
}

impl<K: AsUsize, V> std::ops::IndexMut<K> for ArrayMap<K, V> {
    fn index_mut(&mut self, index: K) -> &mut V {
        &mut self.0[index.as_usize()]
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;

    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    struct Key(usize);

    impl AsUsize for Key {
        fn as_usize(self) -> usize { self.0 }
    }

    #[test]
    fn index_and_get() {
        let mut map: ArrayMap<Key, u32> = ArrayMap::new_with(4, |i| i as u32 * 10);
        assert_eq!(map[Key(2)], 20);
        map[Key(2)] = 7;
        assert_eq!(map.get(Key(2)), Some(&7));
        assert_eq!(map.get(Key(4)), None);
        assert_eq!(map.len(), 4);
        assert_eq!(map.iter().copied().collect::<Vec<_>>(), vec![0, 10, 7, 30]);
    }
}
