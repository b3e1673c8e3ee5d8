//! Per-slot wait queues.
//!
//! A reach that conflicts with the current holders parks on a ticket queued
//! on the slot. Tickets are kept in arrival order; a waiter that loses the
//! race after being woken re-enqueues with its original sequence number, so
//! it keeps its place.
//!
//! Wake policy when the last holder leaves:
//!
//! - head is exclusive: wake only the head
//! - head is shared: wake every shared waiter, leaving exclusive ones queued
//!
//! Shared waiters may therefore overtake an exclusive waiter that arrived
//! earlier, but an exclusive waiter never overtakes a shared one ahead of it.
//! Any change of the slot's binding wakes everyone.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A parked reach request.
#[derive(Debug)]
pub(crate) struct WaitTicket {
    seq: u64,
    shared: bool,
    woken: Mutex<bool>,
    cond: Condvar,
}

impl WaitTicket {
    pub fn new(seq: u64, shared: bool) -> Arc<Self> {
        Arc::new(Self {
            seq,
            shared,
            woken: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Blocks until the ticket is woken.
    pub fn wait(&self) {
        let mut woken = self.woken.lock();
        while !*woken {
            self.cond.wait(&mut woken);
        }
    }

    fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cond.notify_one();
    }
}

/// Arrival-ordered queue of parked requests.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    tickets: VecDeque<Arc<WaitTicket>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Queues a ticket at its arrival position.
    pub fn enqueue(&mut self, ticket: Arc<WaitTicket>) {
        let pos = self.tickets.partition_point(|t| t.seq() < ticket.seq());
        self.tickets.insert(pos, ticket);
    }

    /// Wakes the waiters entitled to run after the last holder left.
    ///
    /// Returns the number of waiters woken.
    pub fn wake_next(&mut self) -> usize {
        match self.tickets.front() {
            None => 0,
            Some(head) if !head.is_shared() => {
                if let Some(head) = self.tickets.pop_front() {
                    head.wake();
                }
                1
            }
            Some(_) => self.wake_shared(),
        }
    }

    /// Wakes every shared waiter.
    pub fn wake_shared(&mut self) -> usize {
        let mut woken = 0;
        self.tickets.retain(|ticket| {
            if ticket.is_shared() {
                ticket.wake();
                woken += 1;
                false
            } else {
                true
            }
        });
        woken
    }

    /// Wakes every waiter.
    pub fn wake_all(&mut self) -> usize {
        let woken = self.tickets.len();
        for ticket in self.tickets.drain(..) {
            ticket.wake();
        }
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn is_woken(ticket: &WaitTicket) -> bool {
        *ticket.woken.lock()
    }

    #[test]
    fn test_enqueue_keeps_arrival_order() {
        let mut queue = WaitQueue::new();
        queue.enqueue(WaitTicket::new(3, true));
        queue.enqueue(WaitTicket::new(1, false));
        queue.enqueue(WaitTicket::new(2, true));

        let seqs: Vec<u64> = queue.tickets.iter().map(|t| t.seq()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_exclusive_head_wakes_alone() {
        let mut queue = WaitQueue::new();
        let writer = WaitTicket::new(1, false);
        let reader = WaitTicket::new(2, true);
        queue.enqueue(writer.clone());
        queue.enqueue(reader.clone());

        assert_eq!(queue.wake_next(), 1);
        assert!(is_woken(&writer));
        assert!(!is_woken(&reader));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_shared_head_wakes_all_readers() {
        let mut queue = WaitQueue::new();
        let r1 = WaitTicket::new(1, true);
        let w = WaitTicket::new(2, false);
        let r2 = WaitTicket::new(3, true);
        queue.enqueue(r1.clone());
        queue.enqueue(w.clone());
        queue.enqueue(r2.clone());

        assert_eq!(queue.wake_next(), 2);
        assert!(is_woken(&r1));
        assert!(is_woken(&r2));
        assert!(!is_woken(&w));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_wake_all() {
        let mut queue = WaitQueue::new();
        queue.enqueue(WaitTicket::new(1, false));
        queue.enqueue(WaitTicket::new(2, true));
        assert_eq!(queue.wake_all(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.wake_next(), 0);
    }

    #[test]
    fn test_wait_blocks_until_woken() {
        let ticket = WaitTicket::new(1, true);
        let mut queue = WaitQueue::new();
        queue.enqueue(ticket.clone());

        let waiter = {
            let ticket = ticket.clone();
            thread::spawn(move || ticket.wait())
        };
        thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished());

        queue.wake_next();
        waiter.join().unwrap();
    }
}
