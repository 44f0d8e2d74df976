//! Item queue: FIFO backlog of discovered items.

use std::collections::VecDeque;

use tracing::debug;

use super::types::Item;

/// FIFO backlog of discovered items.
///
/// No de-duplication: an url discovered on two pages is queued twice.
#[derive(Debug, Default)]
pub struct ItemQueue {
    items: VecDeque<Item>,
}

impl ItemQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append items in discovery order.
    pub fn enqueue_all(&mut self, items: impl IntoIterator<Item = Item>) {
        let before = self.items.len();
        self.items.extend(items);
        debug!(
            added = self.items.len() - before,
            size = self.items.len(),
            "Items enqueued"
        );
    }

    pub fn dequeue_front(&mut self) -> Option<Item> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drop every queued item, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u32) -> Item {
        Item::new(format!("https://example.com/{n}"), format!("Item {n}"))
    }

    #[test]
    fn fifo_order() {
        let mut queue = ItemQueue::new();
        queue.enqueue_all(vec![item(1), item(2)]);
        queue.enqueue_all(vec![item(3)]);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue_front().unwrap().title, "Item 1");
        assert_eq!(queue.dequeue_front().unwrap().title, "Item 2");
        assert_eq!(queue.dequeue_front().unwrap().title, "Item 3");
        assert!(queue.dequeue_front().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicates_are_kept() {
        let mut queue = ItemQueue::new();
        queue.enqueue_all(vec![item(1)]);
        queue.enqueue_all(vec![item(1)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut queue = ItemQueue::new();
        queue.enqueue_all(vec![item(1), item(2)]);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
