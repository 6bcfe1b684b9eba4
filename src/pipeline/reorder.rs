use std::collections::BTreeMap;

/// Restores input order for results that complete out of order.
///
/// Items are pushed with their input index; `push` returns every item that
/// is now contiguous with what was already released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, index: usize, item: T) -> Vec<T> {
        if index < self.next {
            tracing::warn!("Dropping duplicate result for index {}", index);
            return Vec::new();
        }
        self.pending.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        ready
    }

    /// Items still waiting on an earlier index.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_completion() {
        let mut buffer = ReorderBuffer::new();

        assert!(buffer.push(2, "c").is_empty());
        assert!(buffer.push(1, "b").is_empty());
        assert_eq!(buffer.pending(), 2);
        assert_eq!(buffer.push(0, "a"), vec!["a", "b", "c"]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_in_order_passes_through() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.push(0, 10), vec![10]);
        assert_eq!(buffer.push(1, 11), vec![11]);
    }
}
