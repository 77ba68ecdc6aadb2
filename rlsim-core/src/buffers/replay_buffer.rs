use crate::rng::RNG;
use rand::Rng;

/// Fixed capacity ring buffer. Once full, every push evicts the oldest element.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    next: usize,
}

impl<T> ReplayBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Stores `item`, returning the evicted element when the buffer was already full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.next], item);
        self.next = (self.next + 1) % self.capacity;
        Some(evicted)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_batch(&self, batch_size: usize) -> bool {
        self.slots.len() >= batch_size
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.next);
        older.iter().chain(newer.iter())
    }

    /// Uniform sample with replacement.
    pub fn sample(&self, batch_size: usize) -> Vec<&T> {
        if self.slots.is_empty() {
            return vec![];
        }
        RNG.with_borrow_mut(|rng| {
            (0..batch_size)
                .map(|_| &self.slots[rng.random_range(0..self.slots.len())])
                .collect()
        })
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod test {
    use super::ReplayBuffer;

    #[test]
    fn never_exceeds_capacity_and_evicts_fifo() {
        let mut buffer = ReplayBuffer::new(3);
        for i in 0..3 {
            assert_eq!(buffer.push(i), None);
        }
        assert_eq!(buffer.push(3), Some(0));
        assert_eq!(buffer.push(4), Some(1));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        for i in 5..20 {
            buffer.push(i);
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![17, 18, 19]);
    }

    #[test]
    fn sample_draws_from_stored_items() {
        crate::rng::seed(5);
        let mut buffer = ReplayBuffer::new(4);
        assert!(buffer.sample(8).is_empty());
        buffer.push(10);
        buffer.push(20);
        assert!(!buffer.has_batch(3));
        let batch = buffer.sample(8);
        assert_eq!(batch.len(), 8);
        assert!(batch.iter().all(|x| **x == 10 || **x == 20));
    }

    #[test]
    fn clear_empties_the_ring() {
        let mut buffer = ReplayBuffer::new(2);
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(4);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![4]);
    }
}
