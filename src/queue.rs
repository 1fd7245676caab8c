//! Bounded priority request queue (spec §4.6, component C6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::priority::Priority;
use crate::verb::Verb;

/// Capacity of each of the three priority FIFOs (spec §3 "Request queue").
pub const QUEUE_CAPACITY: usize = 25;

static NEXT_ID: AtomicU64 = AtomicU64::new(10_000);

fn next_request_id() -> u64 {
    // Wraps between 10_000 and 999_999_999 (spec §3 "Queued request").
    loop {
        let current = NEXT_ID.load(Ordering::Relaxed);
        let next = if current >= 999_999_999 {
            10_000
        } else {
            current + 1
        };
        if NEXT_ID
            .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return current;
        }
    }
}

/// A request waiting for admission, owned by exactly one [`RequestQueue`]
/// between enqueue and take (spec §3 "Lifecycle").
pub struct QueuedRequest {
    /// Monotonically assigned id.
    pub id: u64,
    /// Priority this request was enqueued with.
    pub priority: Priority,
    /// When the request was enqueued.
    pub queued_time: Instant,
    /// The verb to dispatch.
    pub method: Verb,
    /// The normalized target URL.
    pub url: String,
    /// Effective config for this request.
    pub config: ClientConfig,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
    aborted: Arc<AtomicBool>,
    completion: Arc<Completion>,
}

/// Shared slot a queued request's outcome is deposited into, and that a
/// caller can block on (spec §3 "resolve, reject: continuations").
pub(crate) struct Completion {
    lock: Mutex<Option<Result<Envelope, Error>>>,
    condvar: Condvar,
}

impl Completion {
    fn new() -> Self {
        Completion {
            lock: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    fn resolve(&self, result: Result<Envelope, Error>) {
        let mut guard = self.lock.lock().unwrap();
        *guard = Some(result);
        self.condvar.notify_all();
    }

    fn wait(&self) -> Result<Envelope, Error> {
        let mut guard = self.lock.lock().unwrap();
        while guard.is_none() {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard.take().unwrap()
    }
}

/// A handle returned to the caller of an enqueued request. Blocks on
/// [`PendingRequest::wait`] until the dispatcher resolves or rejects it.
pub struct PendingRequest {
    completion: Arc<Completion>,
    aborted: Arc<AtomicBool>,
}

impl PendingRequest {
    /// Block until the queued request completes (dispatched, failed, or
    /// aborted).
    pub fn wait(self) -> Result<Envelope, Error> {
        self.completion.wait()
    }

    /// Abort this request. If it is still queued, it is skipped on drain and
    /// resolved with [`Error::Cancelled`]; if already in flight, the
    /// dispatcher is expected to notice `is_aborted()` and cancel.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.completion.resolve(Err(Error::Cancelled));
    }
}

impl QueuedRequest {
    /// Has this item been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolve this item's caller-visible completion.
    pub fn resolve(&self, result: Result<Envelope, Error>) {
        self.completion.resolve(result);
    }
}

struct Lane {
    items: VecDeque<QueuedRequest>,
}

impl Lane {
    fn new() -> Self {
        Lane {
            items: VecDeque::new(),
        }
    }
}

/// Three bounded priority-ordered FIFOs (spec §3, §4.6).
///
/// `add`/`remove` are serializable with respect to each other (spec §5
/// "Shared resources"): both lock the same mutex for the lane they touch.
pub struct RequestQueue {
    high: Mutex<Lane>,
    normal: Mutex<Lane>,
    low: Mutex<Lane>,
    draining: AtomicBool,
}

impl Default for RequestQueue {
    fn default() -> Self {
        RequestQueue {
            high: Mutex::new(Lane::new()),
            normal: Mutex::new(Lane::new()),
            low: Mutex::new(Lane::new()),
            draining: AtomicBool::new(false),
        }
    }
}

impl RequestQueue {
    fn lane(&self, priority: Priority) -> &Mutex<Lane> {
        match priority {
            Priority::High => &self.high,
            Priority::Auto => &self.normal,
            Priority::Low => &self.low,
        }
    }

    /// Enqueue a request at the given priority. Fails with
    /// [`Error::QueueFull`] if that lane (selected per spec §4.6: `Low` ->
    /// low, `High` -> high, anything else -> normal) is at capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        priority: Priority,
        method: Verb,
        url: String,
        config: ClientConfig,
        body: Option<Vec<u8>>,
    ) -> Result<PendingRequest, Error> {
        let mut lane = self.lane(priority).lock().unwrap();
        if lane.items.len() >= QUEUE_CAPACITY {
            return Err(Error::QueueFull);
        }
        let aborted = Arc::new(AtomicBool::new(false));
        let completion = Arc::new(Completion::new());
        let item = QueuedRequest {
            id: next_request_id(),
            priority,
            queued_time: Instant::now(),
            method,
            url,
            config,
            body,
            aborted: aborted.clone(),
            completion: completion.clone(),
        };
        lane.items.push_back(item);
        Ok(PendingRequest { completion, aborted })
    }

    /// Remove and return up to `max` non-aborted items, draining high fully
    /// before normal, normal fully before low (spec §5 "Ordering
    /// guarantees"). Aborted items are dropped silently as they're
    /// encountered.
    pub fn take_batch(&self, max: usize) -> Vec<QueuedRequest> {
        let mut out = Vec::with_capacity(max);
        for lane_mutex in [&self.high, &self.normal, &self.low] {
            if out.len() >= max {
                break;
            }
            let mut lane = lane_mutex.lock().unwrap();
            while out.len() < max {
                match lane.items.pop_front() {
                    Some(item) if item.is_aborted() => continue,
                    Some(item) => out.push(item),
                    None => break,
                }
            }
        }
        out
    }

    /// Remove a specific item by id (used by explicit cancellation), scanning
    /// the priority-indicated queue first, then all queues (spec §4.6).
    pub fn remove(&self, id: u64, hint: Priority) -> bool {
        let ordered = match hint {
            Priority::High => [&self.high, &self.normal, &self.low],
            Priority::Auto => [&self.normal, &self.high, &self.low],
            Priority::Low => [&self.low, &self.high, &self.normal],
        };
        for lane_mutex in ordered {
            let mut lane = lane_mutex.lock().unwrap();
            if let Some(pos) = lane.items.iter().position(|i| i.id == id) {
                let item = lane.items.remove(pos).unwrap();
                item.resolve(Err(Error::Cancelled));
                return true;
            }
        }
        false
    }

    /// Total items across all three lanes, aborted or not.
    pub fn len(&self) -> usize {
        self.high.lock().unwrap().items.len()
            + self.normal.lock().unwrap().items.len()
            + self.low.lock().unwrap().items.len()
    }

    /// True if every lane is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the right to drain this queue set. Returns `false` if a drain
    /// is already in progress, so callers (background dispatch, a caller's
    /// own periodic timer) never run two drains over the same queue
    /// concurrently (spec §4.6 "processing" guard).
    pub fn try_begin_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the claim taken by [`RequestQueue::try_begin_drain`].
    pub fn end_drain(&self) {
        self.draining.store(false, Ordering::SeqCst);
    }
}

/// Batch size and jitter bounds for [`RequestQueue::take_batch`] drains
/// (spec §4.6).
pub const DRAIN_BATCH_SIZE: usize = 3;
/// Inter-take jitter lower bound within a drain batch.
pub const DRAIN_JITTER_MIN: Duration = Duration::from_millis(100);
/// Inter-take jitter upper bound within a drain batch.
pub const DRAIN_JITTER_MAX: Duration = Duration::from_millis(110);
/// Delay between successive drain passes when the queue is non-empty.
pub const DRAIN_RESCHEDULE: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn cfg() -> ClientConfig {
        ClientConfig::default()
    }

    #[test]
    fn priority_ordering_within_one_drain_pass() {
        let q = RequestQueue::default();
        let _low = q
            .add(Priority::Low, Verb::Get, "l".into(), cfg(), None)
            .unwrap();
        let _high = q
            .add(Priority::High, Verb::Get, "h".into(), cfg(), None)
            .unwrap();
        let _normal = q
            .add(Priority::Auto, Verb::Get, "n".into(), cfg(), None)
            .unwrap();

        let batch = q.take_batch(10);
        let urls: Vec<&str> = batch.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["h", "n", "l"]);
    }

    #[test]
    fn full_lane_rejects_with_queue_full() {
        let q = RequestQueue::default();
        for i in 0..QUEUE_CAPACITY {
            q.add(Priority::Low, Verb::Get, format!("{i}"), cfg(), None)
                .unwrap();
        }
        let err = q.add(Priority::Low, Verb::Get, "overflow".into(), cfg(), None);
        assert!(matches!(err, Err(Error::QueueFull)));
    }

    #[test]
    fn abort_before_drain_skips_item() {
        let q = RequestQueue::default();
        let pending = q
            .add(Priority::Auto, Verb::Get, "a".into(), cfg(), None)
            .unwrap();
        pending.abort();
        let batch = q.take_batch(10);
        assert!(batch.is_empty());
        assert!(matches!(pending.wait(), Err(Error::Cancelled)));
    }

    #[test]
    fn drain_batch_caps_at_max() {
        let q = RequestQueue::default();
        for i in 0..5 {
            q.add(Priority::Auto, Verb::Get, format!("{i}"), cfg(), None)
                .unwrap();
        }
        let batch = q.take_batch(DRAIN_BATCH_SIZE);
        assert_eq!(batch.len(), DRAIN_BATCH_SIZE);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_guard_rejects_reentrant_claim_until_released() {
        let q = RequestQueue::default();
        assert!(q.try_begin_drain());
        assert!(!q.try_begin_drain());
        q.end_drain();
        assert!(q.try_begin_drain());
    }
}
