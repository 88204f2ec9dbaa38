use alloc::collections::BTreeSet;

/// Hands out small integer ids, reusing released ones lowest first.
///
/// Every id below `next` that is not in `released` is in use, so the id
/// returned by [`allocate`](Self::allocate) is always the lowest free one.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    first: u32,
    next: u32,
    limit: u32,
    released: BTreeSet<u32>,
}

impl IdAllocator {
    /// Creates an allocator issuing ids from `first` up to, but excluding, `limit`.
    pub const fn new(first: u32, limit: u32) -> Self {
        Self {
            first,
            next: first,
            limit,
            released: BTreeSet::new(),
        }
    }

    /// Returns the lowest free id, or `None` if every id is taken.
    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(id) = self.released.pop_first() {
            return Some(id);
        }
        if self.next >= self.limit {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(id)
    }

    /// Makes `id` available again. Returns false if it was not in use.
    pub fn release(&mut self, id: u32) -> bool {
        if id < self.first || id >= self.next || self.released.contains(&id) {
            return false;
        }
        if id + 1 == self.next {
            self.next = id;
            // Fold any released ids now at the top back into the counter.
            while self.next > self.first && self.released.remove(&(self.next - 1)) {
                self.next -= 1;
            }
            true
        } else {
            self.released.insert(id)
        }
    }

    pub fn is_allocated(&self, id: u32) -> bool {
        id >= self.first && id < self.next && !self.released.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_sequentially() {
        let mut ids = IdAllocator::new(1, 64);
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), Some(3));
    }

    #[test]
    fn non_lifo_release_never_collides() {
        let mut ids = IdAllocator::new(1, 64);
        let a = ids.allocate().unwrap();
        let b = ids.allocate().unwrap();
        let c = ids.allocate().unwrap();

        assert!(ids.release(a));
        let d = ids.allocate().unwrap();
        assert_eq!(d, a);
        assert_ne!(d, b);
        assert_ne!(d, c);
        assert_eq!(ids.allocate(), Some(4));
    }

    #[test]
    fn lowest_released_first() {
        let mut ids = IdAllocator::new(1, 64);
        for _ in 0..5 {
            ids.allocate();
        }
        ids.release(4);
        ids.release(2);
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), Some(4));
        assert_eq!(ids.allocate(), Some(6));
    }

    #[test]
    fn releasing_top_folds_back() {
        let mut ids = IdAllocator::new(1, 64);
        for _ in 0..3 {
            ids.allocate();
        }
        ids.release(2);
        ids.release(3);
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), Some(3));
        assert!(!ids.is_allocated(4));
    }

    #[test]
    fn exhaustion_and_double_release() {
        let mut ids = IdAllocator::new(1, 3);
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), None);
        assert!(ids.release(1));
        assert!(!ids.release(1));
        assert!(!ids.release(7));
    }
}
