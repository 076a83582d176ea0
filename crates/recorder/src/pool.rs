//! Fixed packet pool with free/ready handoff between producers and the writer.
//!
//! N [`MediaPacket`] slots are allocated once. Slot indices move between a
//! free ring and a ready ring under a single queue lock; two condvars signal
//! "a free slot exists" and "a ready slot exists". Whoever holds a
//! [`PacketLease`] has exclusive access to that slot's packet, so a slot can
//! never be filled and written at the same time.
//!
//! ```text
//! producer: acquire_free ──fill──> publish_ready ─┐
//!                                                 │ ready ring (FIFO)
//! writer:   release_free <──write── consume_ready <┘
//! ```

use std::ops::{Deref, DerefMut};

use ms_common::{MediaPacket, Rational};
use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

/// Returned by [`PacketPool::acquire_free`] once shutdown was signaled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("packet pool is shut down")]
pub struct PoolClosed;

/// Fixed-capacity FIFO of slot indices.
#[derive(Debug)]
pub struct SlotRing {
    buf: Box<[usize]>,
    head: usize,
    len: usize,
}

impl SlotRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `index`. Returns `false` if the ring is full.
    pub fn push(&mut self, index: usize) -> bool {
        if self.len == self.buf.len() {
            return false;
        }
        let tail = (self.head + self.len) % self.buf.len();
        self.buf[tail] = index;
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let index = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        Some(index)
    }
}

/// Who currently holds a lease.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Holder {
    Producer,
    Writer,
}

struct QueueState {
    free: SlotRing,
    ready: SlotRing,
    producer_held: usize,
    writer_held: usize,
    shutdown: bool,
}

impl QueueState {
    fn held_mut(&mut self, holder: Holder) -> &mut usize {
        match holder {
            Holder::Producer => &mut self.producer_held,
            Holder::Writer => &mut self.writer_held,
        }
    }
}

/// Occupancy snapshot, taken under the queue lock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub ready: usize,
    /// Leased by producers, being filled.
    pub producer_held: usize,
    /// Leased by the writer, being written.
    pub writer_held: usize,
}

impl PoolStats {
    pub fn in_flight(&self) -> usize {
        self.producer_held + self.writer_held
    }

    /// Every slot is accounted for exactly once.
    pub fn is_conserved(&self) -> bool {
        self.free + self.ready + self.in_flight() == self.capacity
    }
}

/// Bounded packet pool shared by the producers and the writer thread.
pub struct PacketPool {
    slots: Box<[Mutex<MediaPacket>]>,
    queues: Mutex<QueueState>,
    free_available: Condvar,
    ready_available: Condvar,
}

impl PacketPool {
    /// Allocate `capacity` empty packets, all free.
    ///
    /// # Panics
    /// If `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "packet pool capacity must be > 0");
        let mut free = SlotRing::with_capacity(capacity);
        for index in 0..capacity {
            free.push(index);
        }
        Self {
            slots: (0..capacity)
                .map(|_| Mutex::new(MediaPacket::default()))
                .collect(),
            queues: Mutex::new(QueueState {
                free,
                ready: SlotRing::with_capacity(capacity),
                producer_held: 0,
                writer_held: 0,
                shutdown: false,
            }),
            free_available: Condvar::new(),
            ready_available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Block until a free slot exists and lease it for filling.
    pub fn acquire_free(&self) -> Result<PacketLease<'_>, PoolClosed> {
        let mut queues = self.queues.lock();
        let index = loop {
            if queues.shutdown {
                return Err(PoolClosed);
            }
            if let Some(index) = queues.free.pop() {
                queues.producer_held += 1;
                break index;
            }
            self.free_available.wait(&mut queues);
        };
        drop(queues);
        Ok(self.lease(index, Holder::Producer))
    }

    /// Rescale the lease's timestamps from `from` to `to`, tag it with
    /// `stream_index` and hand it to the writer.
    pub fn publish_ready(
        &self,
        mut lease: PacketLease<'_>,
        stream_index: u32,
        from: Rational,
        to: Rational,
    ) {
        lease.stream_index = stream_index;
        lease.pts = Rational::rescale(lease.pts, from, to);
        lease.dts = Rational::rescale(lease.dts, from, to);
        let (index, holder) = lease.finish();

        let mut queues = self.queues.lock();
        *queues.held_mut(holder) -= 1;
        queues.ready.push(index);
        self.ready_available.notify_one();
    }

    /// Block until a ready slot exists and lease it for writing.
    ///
    /// Returns `None` once shutdown was signaled, the ready ring is empty and
    /// no producer still holds a lease.
    pub fn consume_ready(&self) -> Option<PacketLease<'_>> {
        let mut queues = self.queues.lock();
        let index = loop {
            if let Some(index) = queues.ready.pop() {
                queues.writer_held += 1;
                break index;
            }
            if queues.shutdown && queues.producer_held == 0 {
                return None;
            }
            self.ready_available.wait(&mut queues);
        };
        drop(queues);
        Some(self.lease(index, Holder::Writer))
    }

    /// Return a slot to the free ring and wake one blocked producer.
    pub fn release_free(&self, lease: PacketLease<'_>) {
        let (index, holder) = lease.finish();
        self.recycle(index, holder);
    }

    /// Refuse new leases and wake every waiter.
    pub fn shutdown(&self) {
        let mut queues = self.queues.lock();
        queues.shutdown = true;
        self.free_available.notify_all();
        self.ready_available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.queues.lock().shutdown
    }

    pub fn stats(&self) -> PoolStats {
        let queues = self.queues.lock();
        PoolStats {
            capacity: self.slots.len(),
            free: queues.free.len(),
            ready: queues.ready.len(),
            producer_held: queues.producer_held,
            writer_held: queues.writer_held,
        }
    }

    fn lease(&self, index: usize, holder: Holder) -> PacketLease<'_> {
        // The previous holder released this guard before the index reached a
        // ring, so this does not wait.
        let packet = self.slots[index].lock();
        PacketLease {
            packet,
            slot: SlotReturn {
                pool: self,
                index,
                holder,
                armed: true,
            },
        }
    }

    fn recycle(&self, index: usize, holder: Holder) {
        let mut queues = self.queues.lock();
        *queues.held_mut(holder) -= 1;
        queues.free.push(index);
        self.free_available.notify_one();
        if queues.shutdown && queues.producer_held == 0 {
            // The writer may be waiting for this last lease to come back.
            self.ready_available.notify_all();
        }
    }
}

/// Exclusive access to one pooled packet.
///
/// Pass it back with [`PacketPool::publish_ready`] or
/// [`PacketPool::release_free`]. Dropping it returns the slot to the free ring.
pub struct PacketLease<'a> {
    // Field order matters: the packet guard is unlocked before `slot` puts
    // the index back on a ring.
    packet: MutexGuard<'a, MediaPacket>,
    slot: SlotReturn<'a>,
}

impl PacketLease<'_> {
    /// Slot index in the pool arena.
    pub fn slot_index(&self) -> usize {
        self.slot.index
    }

    /// Unlock the packet and take over responsibility for the slot index.
    fn finish(self) -> (usize, Holder) {
        let PacketLease { packet, mut slot } = self;
        drop(packet);
        slot.armed = false;
        (slot.index, slot.holder)
    }
}

impl Deref for PacketLease<'_> {
    type Target = MediaPacket;

    fn deref(&self) -> &MediaPacket {
        &self.packet
    }
}

impl DerefMut for PacketLease<'_> {
    fn deref_mut(&mut self) -> &mut MediaPacket {
        &mut self.packet
    }
}

/// Puts an abandoned lease's slot back on the free ring.
struct SlotReturn<'a> {
    pool: &'a PacketPool,
    index: usize,
    holder: Holder,
    armed: bool,
}

impl Drop for SlotReturn<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.recycle(self.index, self.holder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_common::PacketFlags;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ring_is_fifo_and_bounded() {
        let mut ring = SlotRing::with_capacity(3);
        assert!(ring.push(7) && ring.push(8) && ring.push(9));
        assert!(!ring.push(10));
        assert_eq!(ring.pop(), Some(7));
        assert!(ring.push(10));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), Some(8));
        assert_eq!(ring.pop(), Some(9));
        assert_eq!(ring.pop(), Some(10));
        assert_eq!(ring.pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn new_pool_is_all_free() {
        let pool = PacketPool::new(4);
        let stats = pool.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.free, 4);
        assert_eq!(stats.in_flight(), 0);
        assert!(stats.is_conserved());
    }

    #[test]
    fn publish_consume_release_cycle() {
        let pool = PacketPool::new(2);
        let mut lease = pool.acquire_free().unwrap();
        lease.fill(&[1, 2, 3], 1000, PacketFlags::KEYFRAME);
        assert_eq!(pool.stats().producer_held, 1);
        pool.publish_ready(lease, 1, Rational::MILLIS, Rational::timebase(25));

        let stats = pool.stats();
        assert_eq!((stats.free, stats.ready, stats.in_flight()), (1, 1, 0));

        let lease = pool.consume_ready().unwrap();
        assert_eq!(lease.data, vec![1, 2, 3]);
        assert_eq!((lease.pts, lease.dts), (25, 25));
        assert_eq!(lease.stream_index, 1);
        assert!(lease.is_keyframe());
        assert_eq!(pool.stats().writer_held, 1);
        pool.release_free(lease);
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn ready_ring_is_fifo() {
        let pool = PacketPool::new(8);
        for pts in 0..5 {
            let mut lease = pool.acquire_free().unwrap();
            lease.fill(&[pts as u8], pts, PacketFlags::NONE);
            pool.publish_ready(lease, 0, Rational::MILLIS, Rational::MILLIS);
        }
        for pts in 0..5 {
            let lease = pool.consume_ready().unwrap();
            assert_eq!(lease.pts, pts);
            pool.release_free(lease);
        }
    }

    #[test]
    fn dropped_lease_returns_to_free() {
        let pool = PacketPool::new(1);
        {
            let mut lease = pool.acquire_free().unwrap();
            lease.fill(&[9], 0, PacketFlags::NONE);
        }
        let stats = pool.stats();
        assert_eq!((stats.free, stats.producer_held), (1, 0));
        assert!(pool.acquire_free().is_ok());
    }

    #[test]
    fn acquire_fails_after_shutdown() {
        let pool = PacketPool::new(2);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.acquire_free().err(), Some(PoolClosed));
    }

    #[test]
    fn consume_drains_before_reporting_shutdown() {
        let pool = PacketPool::new(4);
        for pts in 0..3 {
            let mut lease = pool.acquire_free().unwrap();
            lease.fill(&[0], pts, PacketFlags::NONE);
            pool.publish_ready(lease, 0, Rational::MILLIS, Rational::MILLIS);
        }
        pool.shutdown();
        let mut seen = 0;
        while let Some(lease) = pool.consume_ready() {
            seen += 1;
            pool.release_free(lease);
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn exhausted_pool_blocks_until_release() {
        let pool = Arc::new(PacketPool::new(1));
        let first = pool.acquire_free().unwrap();
        pool.publish_ready(first, 0, Rational::MILLIS, Rational::MILLIS);

        let producer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let lease = pool.acquire_free().unwrap();
                lease.slot_index()
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        let lease = pool.consume_ready().unwrap();
        pool.release_free(lease);
        assert_eq!(producer.join().unwrap(), 0);
    }

    #[test]
    fn shutdown_wakes_blocked_producer() {
        let pool = Arc::new(PacketPool::new(1));
        let held = pool.acquire_free().unwrap();
        let producer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire_free().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.shutdown();
        assert_eq!(producer.join().unwrap(), Err(PoolClosed));
        drop(held);
    }

    #[test]
    fn writer_waits_for_lease_acquired_before_shutdown() {
        let pool = Arc::new(PacketPool::new(2));
        let lease = pool.acquire_free().unwrap();
        pool.shutdown();

        let writer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut written = Vec::new();
                while let Some(lease) = pool.consume_ready() {
                    written.push(lease.pts);
                    pool.release_free(lease);
                }
                written
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!writer.is_finished());

        let mut lease = lease;
        lease.fill(&[1], 42, PacketFlags::NONE);
        pool.publish_ready(lease, 0, Rational::MILLIS, Rational::MILLIS);
        assert_eq!(writer.join().unwrap(), vec![42]);
        assert!(pool.stats().is_conserved());
    }
}
