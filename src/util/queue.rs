use alloc::{vec, vec::Vec};

/// Doubly linked list over the indices `0..n` of some external array.
///
/// Slot `n` is the head sentinel and slot `n + 1` the tail sentinel, so
/// insertion and removal never branch on emptiness.
pub struct IndexLink {
    n: usize,
    le_next: Vec<Option<usize>>,
    le_prev: Vec<Option<usize>>,
    rem: usize,
}

impl IndexLink {
    /// empty list over `n` indices
    #[inline]
    pub fn new(n: usize) -> Self {
        let occupied = n + 2;
        let mut link = IndexLink {
            n,
            le_next: vec![None; occupied],
            le_prev: vec![None; occupied],
            rem: 0,
        };
        link.le_next[n] = Some(n + 1);
        link.le_prev[n + 1] = Some(n);
        link
    }

    /// first index
    #[inline]
    pub fn first(&self) -> Option<usize> {
        self.le_next[self.n].filter(|&x| x != self.n + 1)
    }

    /// whether `elm` is currently linked
    #[inline]
    pub fn contains(&self, elm: usize) -> bool {
        self.le_prev[elm].is_some()
    }

    /// Link `elm` in front. Linking an index twice would corrupt the list.
    #[inline]
    pub fn insert_head(&mut self, elm: usize) {
        debug_assert!(!self.contains(elm));
        let head = self.n;
        self.le_next[elm] = self.le_next[head];
        if let Some(x) = self.le_next[head] {
            self.le_prev[x] = Some(elm);
        }
        self.le_next[head] = Some(elm);
        self.le_prev[elm] = Some(head);
        self.rem += 1;
    }

    /// remove an index from list. Removing an unlinked index does nothing.
    #[inline]
    pub fn remove(&mut self, elm: usize) {
        if !self.contains(elm) {
            return;
        }
        if let Some(x) = self.le_next[elm] {
            self.le_prev[x] = self.le_prev[elm];
        }
        if let Some(x) = self.le_prev[elm] {
            self.le_next[x] = self.le_next[elm];
        }
        self.le_next[elm] = None;
        self.le_prev[elm] = None;
        self.rem -= 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rem
    }
}
