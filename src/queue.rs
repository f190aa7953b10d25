//! Endpoint packet queues
//!
//! A [`PacketQueue`] is a fixed-capacity ring of [`Packet`]s shared between
//! the USB interrupt and application code. Split the queue once into a
//! [`Producer`] and a [`Consumer`]; each side owns exactly one counter for
//! writing, and only reads the other side's counter. The counters increase
//! monotonically and wrap, so no operation needs a lock.
//!
//! For IN (transmit) endpoints, the application produces and the interrupt
//! consumes. For OUT (receive) endpoints, it's the other way around.

#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{packet::Packet, QUEUE_PACKET_COUNT};

/// A single-producer, single-consumer packet queue
///
/// Allocate a queue for each configured endpoint, then hand the collection
/// to the [`Driver`](crate::Driver). The capacity `N` must be a power of two.
///
/// ```
/// use usbd_transfer::{Packet, PacketQueue};
///
/// let mut queue: PacketQueue = PacketQueue::new();
/// let (mut producer, mut consumer) = queue.split();
///
/// assert!(producer.try_push(&Packet::from_bytes(b"hello").unwrap()));
/// assert_eq!(consumer.try_pop().unwrap().as_bytes(), b"hello");
/// ```
pub struct PacketQueue<const N: usize = QUEUE_PACKET_COUNT> {
    slots: [UnsafeCell<Packet>; N],
    /// Written by the producer.
    head: AtomicUsize,
    /// Written by the consumer.
    tail: AtomicUsize,
    /// Set by the producer to ask the consumer to discard everything
    /// before `flush_mark`.
    flush: AtomicBool,
    flush_mark: AtomicUsize,
}

// Safety: shared access only happens through the producer and consumer
// halves, which `split()` hands out at most once per `&mut` borrow. Each half
// writes only the slots and counters that it owns.
unsafe impl<const N: usize> Sync for PacketQueue<N> {}

impl<const N: usize> PacketQueue<N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two());

    /// Create an empty queue
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        const SLOT: UnsafeCell<Packet> = UnsafeCell::new(Packet::new());
        PacketQueue {
            slots: [SLOT; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            flush: AtomicBool::new(false),
            flush_mark: AtomicUsize::new(0),
        }
    }

    /// Returns the number of packets this queue can hold
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Split the queue into its producer and consumer halves
    ///
    /// Any packets left over from a previous split are dropped.
    pub fn split(&mut self) -> (Producer<'_>, Consumer<'_>) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.flush.get_mut() = false;
        *self.flush_mark.get_mut() = 0;

        let ring = Ring {
            slots: &self.slots,
            head: &self.head,
            tail: &self.tail,
            flush: &self.flush,
            flush_mark: &self.flush_mark,
        };
        (Producer { ring }, Consumer { ring })
    }
}

impl<const N: usize> Default for PacketQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared view of a queue, with its capacity erased
#[derive(Clone, Copy)]
struct Ring<'a> {
    slots: &'a [UnsafeCell<Packet>],
    head: &'a AtomicUsize,
    tail: &'a AtomicUsize,
    flush: &'a AtomicBool,
    flush_mark: &'a AtomicUsize,
}

impl Ring<'_> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, counter: usize) -> &UnsafeCell<Packet> {
        // Capacity is a power of two, checked at construction.
        &self.slots[counter & (self.slots.len() - 1)]
    }
}

/// The writing half of a [`PacketQueue`]
pub struct Producer<'a> {
    ring: Ring<'a>,
}

// Safety: the producer only writes the slot at `head`, which the consumer
// can't observe until `head` is published.
unsafe impl Send for Producer<'_> {}

impl Producer<'_> {
    /// Push a copy of `packet` into the queue
    ///
    /// Returns `false`, and leaves the queue untouched, if the queue is full.
    pub fn try_push(&mut self, packet: &Packet) -> bool {
        let head = self.ring.head.load(Ordering::Relaxed);
        if head.wrapping_sub(self.tail(head)) >= self.ring.capacity() {
            return false;
        }
        // Safety: the slot at head is outside of the live packets. If it held
        // a packet discarded by clear(), the consumer drops any copy of it
        // that overlaps the flush. We're the only writer.
        unsafe { *self.ring.slot(head).get() = *packet };
        self.ring.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Discard every packet that's currently queued
    ///
    /// The producer can't move the consumer's counter. Instead, it marks the
    /// current end of the queue, and the consumer drops everything before
    /// the mark on its next access. Packets pushed after `clear()` are kept.
    pub fn clear(&mut self) {
        let head = self.ring.head.load(Ordering::Relaxed);
        self.ring.flush_mark.store(head, Ordering::Relaxed);
        self.ring.flush.store(true, Ordering::Release);
    }

    /// The oldest live packet's counter
    ///
    /// While the consumer hasn't applied a flush, packets before the flush
    /// mark are already gone.
    fn tail(&self, head: usize) -> usize {
        let tail = self.ring.tail.load(Ordering::Acquire);
        if self.ring.flush.load(Ordering::Acquire) {
            let mark = self.ring.flush_mark.load(Ordering::Relaxed);
            if mark.wrapping_sub(tail) <= head.wrapping_sub(tail) {
                return mark;
            }
        }
        tail
    }

    /// Returns the number of queued packets
    pub fn len(&self) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        head.wrapping_sub(self.tail(head))
    }

    /// Returns the number of packets that can be pushed before the queue
    /// is full
    pub fn available(&self) -> usize {
        self.ring.capacity() - self.len()
    }

    /// Indicates if there are no queued packets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indicates if the next push will fail
    pub fn is_full(&self) -> bool {
        self.len() >= self.ring.capacity()
    }

    /// Returns the number of packets this queue can hold
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// The reading half of a [`PacketQueue`]
pub struct Consumer<'a> {
    ring: Ring<'a>,
}

// Safety: the consumer only reads slots in [tail, head), which the producer
// won't write until `tail` moves past them.
unsafe impl Send for Consumer<'_> {}

impl Consumer<'_> {
    /// Returns the (start, end) counters of the queued packets, honoring
    /// any flush the producer requested.
    ///
    /// Doesn't move `tail`.
    fn bounds(&self) -> (usize, usize) {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if self.ring.flush.load(Ordering::Acquire) {
            let mark = self.ring.flush_mark.load(Ordering::Relaxed);
            (Self::flushed_tail(tail, head, mark), head)
        } else {
            (tail, head)
        }
    }

    /// Where `tail` lands once the flush up to `mark` is applied
    fn flushed_tail(tail: usize, head: usize, mark: usize) -> usize {
        let to_mark = mark.wrapping_sub(tail);
        if to_mark <= head.wrapping_sub(tail) {
            mark
        } else if to_mark < usize::MAX / 2 {
            // Mark is past the head we observed, so everything we can see
            // was queued before the flush.
            head
        } else {
            // Already consumed past the mark.
            tail
        }
    }

    /// Apply a pending producer flush, if any
    fn apply_flush(&mut self) {
        if self.ring.flush.swap(false, Ordering::Acquire) {
            let mark = self.ring.flush_mark.load(Ordering::Relaxed);
            let tail = self.ring.tail.load(Ordering::Relaxed);
            let head = self.ring.head.load(Ordering::Acquire);
            self.ring
                .tail
                .store(Self::flushed_tail(tail, head, mark), Ordering::Release);
        }
    }

    /// Pop the oldest packet
    pub fn try_pop(&mut self) -> Option<Packet> {
        loop {
            self.apply_flush();
            let tail = self.ring.tail.load(Ordering::Relaxed);
            let head = self.ring.head.load(Ordering::Acquire);
            if tail == head {
                return None;
            }
            // Safety: tail is in [tail, head), which the producer published.
            // The producer only reuses it after discarding it with clear().
            let packet = unsafe { *self.ring.slot(tail).get() };
            // A flush posted during the copy discarded this packet, and may
            // have reused its slot.
            if self.ring.flush.load(Ordering::Acquire) {
                continue;
            }
            self.ring.tail.store(tail.wrapping_add(1), Ordering::Release);
            return Some(packet);
        }
    }

    /// Copy the oldest packet, without removing it
    pub fn peek(&self) -> Option<Packet> {
        self.iter().next().copied()
    }

    /// Iterate over the queued packets, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Packet> + '_ {
        let (start, end) = self.bounds();
        (0..end.wrapping_sub(start)).map(move |idx| {
            // Safety: every counter in [start, end) is published by the producer.
            // `tail` can't move while we hold &self.
            unsafe { &*self.ring.slot(start.wrapping_add(idx)).get() }
        })
    }

    /// Discard every queued packet
    pub fn clear(&mut self) {
        self.apply_flush();
        let head = self.ring.head.load(Ordering::Acquire);
        self.ring.tail.store(head, Ordering::Release);
    }

    /// Returns the number of queued packets
    pub fn len(&self) -> usize {
        let (start, end) = self.bounds();
        end.wrapping_sub(start)
    }

    /// Indicates if there are no queued packets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of packets this queue can hold
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
