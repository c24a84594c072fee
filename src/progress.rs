//! Shared progress and cancellation state.
//!
//! One `ProgressSink` is created by the caller and handed to every
//! operation as an `Arc`. The worker writes counters, any number of
//! observers poll them. All fields are atomics so readers never block
//! the worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Thread-safe progress counters plus a cooperative cancellation flag.
#[derive(Debug, Default)]
pub struct ProgressSink {
    now: AtomicU64,
    total: AtomicU64,
    step: AtomicU64,
    total_steps: AtomicU64,
    /// f64 bits, bytes per second
    speed: AtomicU64,
    interrupt: AtomicBool,
}

/// Point-in-time copy of all counters, for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub now: u64,
    pub total: u64,
    pub step: u64,
    pub total_steps: u64,
    pub speed: f64,
    pub interrupted: bool,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total_steps(&self, steps: u64) {
        self.total_steps.store(steps, Ordering::Relaxed);
    }

    pub fn set_step(&self, step: u64) {
        self.step.store(step, Ordering::Relaxed);
    }

    pub fn increment_step(&self, by: u64) {
        self.step.fetch_add(by, Ordering::Relaxed);
    }

    /// Force the step counter to its maximum so observers see completion.
    pub fn finish_steps(&self) {
        let max = self.total_steps.load(Ordering::Relaxed);
        self.step.store(max, Ordering::Relaxed);
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub fn set_interrupt(&self, value: bool) {
        self.interrupt.store(value, Ordering::Release);
    }

    pub fn set_now(&self, bytes: u64) {
        self.now.store(bytes, Ordering::Relaxed);
    }

    pub fn set_total(&self, bytes: u64) {
        self.total.store(bytes, Ordering::Relaxed);
    }

    pub fn set_speed(&self, bytes_per_sec: f64) {
        self.speed.store(bytes_per_sec.to_bits(), Ordering::Relaxed);
    }

    /// Clear every counter and the interrupt flag.
    ///
    /// Called by the caller at the start of each logical operation, never
    /// by the operations themselves, so a pending interrupt stays visible
    /// until someone acknowledges it.
    pub fn reset(&self) {
        self.now.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        self.step.store(0, Ordering::Relaxed);
        self.total_steps.store(0, Ordering::Relaxed);
        self.speed.store(0f64.to_bits(), Ordering::Relaxed);
        self.interrupt.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            now: self.now.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            step: self.step.load(Ordering::Relaxed),
            total_steps: self.total_steps.load(Ordering::Relaxed),
            speed: f64::from_bits(self.speed.load(Ordering::Relaxed)),
            interrupted: self.interrupted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_steps_and_finish() {
        let sink = ProgressSink::new();
        sink.set_total_steps(12);
        sink.set_step(3);
        sink.increment_step(2);
        assert_eq!(sink.snapshot().step, 5);

        sink.finish_steps();
        assert_eq!(sink.snapshot().step, 12);
    }

    #[test]
    fn test_speed_roundtrips_through_bits() {
        let sink = ProgressSink::new();
        sink.set_speed(1536.25);
        assert_eq!(sink.snapshot().speed, 1536.25);
    }

    #[test]
    fn test_reset_clears_interrupt() {
        let sink = ProgressSink::new();
        sink.set_now(10);
        sink.set_total(20);
        sink.set_interrupt(true);
        assert!(sink.interrupted());

        sink.reset();
        let snap = sink.snapshot();
        assert!(!snap.interrupted);
        assert_eq!(snap.now, 0);
        assert_eq!(snap.total, 0);
    }

    #[test]
    fn test_interrupt_visible_across_threads() {
        let sink = Arc::new(ProgressSink::new());
        let worker = {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                while !sink.interrupted() {
                    sink.increment_step(1);
                    thread::yield_now();
                }
            })
        };

        sink.set_interrupt(true);
        worker.join().unwrap();
        assert!(sink.interrupted());
    }
}
