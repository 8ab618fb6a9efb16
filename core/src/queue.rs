/// FIFO of messages awaiting delivery
use crate::message::Message;
use std::collections::VecDeque;

/// Strict first-in-first-out message queue.
///
/// Two ways to consume the head: `pop` removes it up front (for sends that
/// cannot be confirmed), while `head` + `commit_head` leave it in place until
/// the caller knows the delivery went through.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn push(&mut self, msg: Message) {
        self.items.push_back(msg);
    }

    /// Remove and return the head
    pub fn pop(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    /// Peek at the head without removing it
    pub fn head(&self) -> Option<&Message> {
        self.items.front()
    }

    /// Remove the head after its delivery was confirmed
    pub fn commit_head(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop everything currently queued
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new();
        queue.push(Message::native("a", "1"));
        queue.push(Message::native("b", "2"));

        assert_eq!(queue.pop().unwrap().nickname, "a");
        assert_eq!(queue.pop().unwrap().nickname, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_head_does_not_remove() {
        let mut queue = MessageQueue::new();
        queue.push(Message::native("a", "1"));

        assert_eq!(queue.head().unwrap().nickname, "a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.commit_head().unwrap().nickname, "a");
        assert!(queue.is_empty());

        // Still usable after draining
        queue.push(Message::native("c", "3"));
        assert_eq!(queue.head().unwrap().nickname, "c");
    }

    #[test]
    fn test_clear_empties_queue() {
        let mut queue = MessageQueue::new();
        queue.push(Message::native("a", "1"));
        queue.push(Message::native("b", "2"));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
    }
}
