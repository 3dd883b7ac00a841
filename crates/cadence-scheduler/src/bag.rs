/// Opaque handle returned by [`Bag::insert`]. Keys are never reused within a bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BagKey(u64);

/// Insertion-ordered collection addressed by generated keys.
#[derive(Debug, Clone)]
pub struct Bag<T> {
    next_key: u64,
    entries: Vec<(BagKey, T)>,
}

impl<T> Bag<T> {
    pub fn new() -> Self {
        Self {
            next_key: 0,
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> BagKey {
        let key = BagKey(self.next_key);
        self.next_key += 1;
        self.entries.push((key, value));
        key
    }

    pub fn get(&self, key: BagKey) -> Option<&T> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: BagKey) -> Option<T> {
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Drops every entry. Keys handed out earlier stay retired.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}
