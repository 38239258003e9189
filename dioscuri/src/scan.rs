//! Snapshot exchange between the background ADC scan and the main loop.
//!
//! The scan interrupt continuously sweeps the nine analog inputs.  Rather
//! than share a raw results array and a ready flag, the producer writes
//! into the back half of a double buffer and publishes a whole sweep at
//! once; the consumer polls for a consistent [AdcSnapshot].  Each code is a
//! single atomic store, so the worst a mid-sweep race can cost is one
//! sample of latency, never a torn value.
//!
//! Single producer, single consumer.  Neither side blocks.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

/// Number of scanned analog inputs.
pub const SCAN_CHANNEL_COUNT: usize = 9;

/// The scanned analog inputs, in sweep order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanChannel {
    /// Castor pulse-width CV jack.
    CastorPulseCv = 0,
    /// Castor pulse-width knob.
    CastorPulseKnob = 1,
    /// Pollux pulse-width CV jack.
    PolluxPulseCv = 2,
    /// Pollux pulse-width knob.
    PolluxPulseKnob = 3,
    /// The LFO rate knob.
    LfoKnob = 4,
    /// Castor pitch knob.
    CastorPitchKnob = 5,
    /// Pollux pitch knob.
    PolluxPitchKnob = 6,
    /// Castor pitch CV jack.
    CastorPitchCv = 7,
    /// Pollux pitch CV jack.
    PolluxPitchCv = 8,
}

/// A consistent copy of one full scan sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdcSnapshot {
    codes: [u16; SCAN_CHANNEL_COUNT],
}

impl AdcSnapshot {
    /// Build a snapshot from raw codes (mainly for tests and host tools).
    pub const fn new(codes: [u16; SCAN_CHANNEL_COUNT]) -> Self {
        Self { codes }
    }

    /// The 12-bit code for `channel`.
    pub const fn get(&self, channel: ScanChannel) -> u16 {
        self.codes[channel as usize]
    }
}

/// The double-buffered scan results exchange.
pub struct ScanQueue {
    slots: [[AtomicU16; SCAN_CHANNEL_COUNT]; 2],
    /// Index of the slot the producer is currently writing.
    back: AtomicUsize,
    ready: AtomicBool,
}

impl ScanQueue {
    /// An empty queue with nothing published.
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU16 = AtomicU16::new(0);
        #[allow(clippy::declare_interior_mutable_const)]
        const SLOT: [AtomicU16; SCAN_CHANNEL_COUNT] = [ZERO; SCAN_CHANNEL_COUNT];
        Self {
            slots: [SLOT, SLOT],
            back: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Producer side: record one channel's code for the sweep in progress.
    pub fn write(&self, channel: ScanChannel, code: u16) {
        let back = self.back.load(Ordering::Relaxed);
        self.slots[back][channel as usize].store(code, Ordering::Relaxed);
    }

    /// Producer side: publish the completed sweep and start the next one in
    /// the other slot.
    ///
    /// Only load/store atomics are used so this works on targets without
    /// compare-and-swap; with a single producer and a single consumer the
    /// worst interleaving drops a publish notification, costing one sample
    /// of latency.
    pub fn publish(&self) {
        let back = self.back.load(Ordering::Relaxed);
        self.back.store(back ^ 1, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Consumer side: take the most recently published sweep, or `None`
    /// when nothing new has been published since the last poll.
    pub fn poll(&self) -> Option<AdcSnapshot> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        self.ready.store(false, Ordering::Relaxed);
        let front = self.back.load(Ordering::Acquire) ^ 1;
        let mut codes = [0u16; SCAN_CHANNEL_COUNT];
        for (code, slot) in codes.iter_mut().zip(self.slots[front].iter()) {
            *code = slot.load(Ordering::Relaxed);
        }
        Some(AdcSnapshot::new(codes))
    }
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_published_means_nothing_polled() {
        let queue = ScanQueue::new();
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn publish_then_poll_roundtrips_a_sweep() {
        let queue = ScanQueue::new();
        queue.write(ScanChannel::CastorPitchCv, 1234);
        queue.write(ScanChannel::LfoKnob, 77);
        queue.publish();

        let snapshot = queue.poll().expect("a published sweep");
        assert_eq!(snapshot.get(ScanChannel::CastorPitchCv), 1234);
        assert_eq!(snapshot.get(ScanChannel::LfoKnob), 77);
        // A second poll has nothing new.
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn a_sweep_in_progress_does_not_disturb_the_published_one() {
        let queue = ScanQueue::new();
        queue.write(ScanChannel::PolluxPitchCv, 100);
        queue.publish();

        // The producer starts overwriting the other slot before the
        // consumer gets around to polling.
        queue.write(ScanChannel::PolluxPitchCv, 200);

        let snapshot = queue.poll().expect("a published sweep");
        assert_eq!(snapshot.get(ScanChannel::PolluxPitchCv), 100);

        queue.publish();
        let snapshot = queue.poll().expect("the second sweep");
        assert_eq!(snapshot.get(ScanChannel::PolluxPitchCv), 200);
    }

    #[test]
    fn a_missed_poll_sees_only_the_newest_sweep() {
        let queue = ScanQueue::new();
        queue.write(ScanChannel::CastorPulseCv, 1);
        queue.publish();
        queue.write(ScanChannel::CastorPulseCv, 2);
        queue.publish();

        let snapshot = queue.poll().expect("a published sweep");
        assert_eq!(snapshot.get(ScanChannel::CastorPulseCv), 2);
    }
}
