//! Property tests for the packet pool and timestamp rescaling.

use std::collections::VecDeque;

use ms_common::{PacketFlags, Rational};
use ms_recorder::{PacketLease, PacketPool};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Acquire,
    Publish,
    Abandon,
    Consume,
    Release,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        3 => Just(Op::Publish),
        1 => Just(Op::Abandon),
        3 => Just(Op::Consume),
        3 => Just(Op::Release),
    ]
}

proptest! {
    #[test]
    fn rescale_from_millis_is_monotonic(
        mut stamps in prop::collection::vec(0i64..10_000_000, 2..64),
        rate in prop::sample::select(vec![8_000u32, 22_050, 44_100, 48_000, 25, 30]),
    ) {
        stamps.sort_unstable();
        let to = Rational::timebase(rate);
        let rescaled: Vec<i64> = stamps
            .iter()
            .map(|&ms| Rational::rescale(ms, Rational::MILLIS, to))
            .collect();
        prop_assert!(rescaled.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn rescale_round_trip_stays_within_one_tick(ms in -1_000_000i64..1_000_000) {
        let to = Rational::timebase(48_000);
        let ticks = Rational::rescale(ms, Rational::MILLIS, to);
        prop_assert_eq!(Rational::rescale(ticks, to, Rational::MILLIS), ms);
    }

    /// Drive the pool through arbitrary non-blocking operation sequences and
    /// check that no slot is ever lost and the ready ring stays FIFO.
    #[test]
    fn slots_are_conserved_and_ready_is_fifo(
        capacity in 1usize..8,
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let pool = PacketPool::new(capacity);
        let mut filling: Vec<PacketLease<'_>> = Vec::new();
        let mut writing: Vec<PacketLease<'_>> = Vec::new();
        let mut published: VecDeque<i64> = VecDeque::new();
        let mut next_pts = 0i64;

        for op in ops {
            let stats = pool.stats();
            match op {
                Op::Acquire if stats.free > 0 => {
                    let mut lease = pool.acquire_free().unwrap();
                    lease.fill(&[next_pts as u8], next_pts, PacketFlags::NONE);
                    next_pts += 1;
                    filling.push(lease);
                }
                Op::Publish if !filling.is_empty() => {
                    let lease = filling.remove(0);
                    published.push_back(lease.pts);
                    pool.publish_ready(lease, 0, Rational::MILLIS, Rational::MILLIS);
                }
                Op::Abandon if !filling.is_empty() => {
                    drop(filling.pop());
                }
                Op::Consume if stats.ready > 0 => {
                    let lease = pool.consume_ready().unwrap();
                    prop_assert_eq!(Some(lease.pts), published.pop_front());
                    writing.push(lease);
                }
                Op::Release if !writing.is_empty() => {
                    pool.release_free(writing.remove(0));
                }
                _ => {}
            }

            let stats = pool.stats();
            prop_assert!(stats.is_conserved());
            prop_assert_eq!(stats.producer_held, filling.len());
            prop_assert_eq!(stats.writer_held, writing.len());
            prop_assert_eq!(stats.ready, published.len());
        }

        drop(filling);
        for lease in writing.drain(..) {
            pool.release_free(lease);
        }
        pool.shutdown();
        while let Some(lease) = pool.consume_ready() {
            pool.release_free(lease);
        }
        prop_assert_eq!(pool.stats().free, capacity);
    }
}
