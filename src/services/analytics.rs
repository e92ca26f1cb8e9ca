use crate::models::Stats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// In-process counters for the credit lifecycle. Reset on restart.
pub struct Analytics {
    credits_issued: AtomicU64,
    credits_claimed: AtomicU64,
    access_denied: AtomicU64,
    verifications_rejected: AtomicU64,
    auto_payments: AtomicU64,
    start_time: Instant,
}

impl Analytics {
    pub fn new() -> Self {
        Self {
            credits_issued: AtomicU64::new(0),
            credits_claimed: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
            verifications_rejected: AtomicU64::new(0),
            auto_payments: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_credit_issued(&self) {
        self.credits_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim(&self) {
        self.credits_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denial(&self) {
        self.access_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.verifications_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_payment(&self) {
        self.auto_payments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> Stats {
        Stats {
            credits_issued: self.credits_issued.load(Ordering::Relaxed),
            credits_claimed: self.credits_claimed.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            verifications_rejected: self.verifications_rejected.load(Ordering::Relaxed),
            auto_payments: self.auto_payments.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}
