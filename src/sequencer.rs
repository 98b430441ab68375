//! Priority-ordered playback sequencer: paced 20ms dispatch with
//! stop/pause/resume/reset and barge-in support.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::capability::Persona;
use crate::codec::chunk_for_pacing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub pcm_bytes: Vec<u8>,
    pub persona: Persona,
    pub priority: SegmentPriority,
    pub text_label: String,
    /// Monotonic turn identity; used to drop segments from a turn that
    /// was cancelled by barge-in after they were already enqueued.
    pub turn_id: u64,
    /// FIFO tiebreak within equal priority.
    sequence: u64,
}

impl PartialEq for AudioSegment {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for AudioSegment {}

impl PartialOrd for AudioSegment {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for AudioSegment {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; higher priority first, then earlier
        // sequence number first within a priority (reversed so the
        // smaller sequence number sorts "greater").
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Inner {
    queue: BinaryHeap<AudioSegment>,
    next_sequence: u64,
}

/// Owns the priority queue and pacing loop for one call's outbound audio.
pub struct Sequencer {
    bytes_per_chunk: usize,
    chunk_duration: Duration,
    inner: Mutex<Inner>,
    should_stop: Arc<AtomicBool>,
    is_paused: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    barge_in_count: AtomicU64,
}

impl Sequencer {
    pub fn new(bytes_per_chunk: usize, chunk_duration_ms: u32) -> Self {
        Self {
            bytes_per_chunk,
            chunk_duration: Duration::from_millis(chunk_duration_ms as u64),
            inner: Mutex::new(Inner {
                queue: BinaryHeap::new(),
                next_sequence: 0,
            }),
            should_stop: Arc::new(AtomicBool::new(false)),
            is_paused: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            barge_in_count: AtomicU64::new(0),
        }
    }

    pub async fn enqueue(
        &self,
        pcm_bytes: Vec<u8>,
        persona: Persona,
        priority: SegmentPriority,
        text_label: impl Into<String>,
        turn_id: u64,
    ) {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.queue.push(AudioSegment {
            pcm_bytes,
            persona,
            priority,
            text_label: text_label.into(),
            turn_id,
            sequence,
        });
    }

    /// Drains the queue, splitting each segment into pacing-sized chunks
    /// and awaiting `output_fn` between sleeps of one chunk duration.
    /// Returns once the queue empties or `stop()` is called.
    pub async fn play<F, Fut>(&self, mut output_fn: F)
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        self.should_stop.store(false, Ordering::SeqCst);

        loop {
            if self.should_stop.load(Ordering::SeqCst) {
                break;
            }

            while self.is_paused.load(Ordering::SeqCst) {
                if self.should_stop.load(Ordering::SeqCst) {
                    return;
                }
                self.stop_notify.notified().await;
            }

            let segment = {
                let mut inner = self.inner.lock().await;
                inner.queue.pop()
            };

            let Some(segment) = segment else {
                break;
            };

            let chunks = chunk_for_pacing(&segment.pcm_bytes, self.bytes_per_chunk);
            for chunk in chunks {
                if self.should_stop.load(Ordering::SeqCst) {
                    return;
                }
                output_fn(chunk).await;
                sleep(self.chunk_duration).await;
            }
        }
    }

    /// Clears the queue and aborts playback at the next chunk boundary.
    /// Completes within one chunk duration.
    pub async fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
        self.is_paused.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        self.barge_in_count.fetch_add(1, Ordering::SeqCst);
        debug!("sequencer stopped (barge-in)");
    }

    pub fn pause(&self) {
        self.is_paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.is_paused.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub async fn reset(&self) {
        self.stop().await;
        self.should_stop.store(false, Ordering::SeqCst);
    }

    pub fn barge_in_count(&self) -> u64 {
        self.barge_in_count.load(Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn persona() -> Persona {
        Persona::Sara
    }

    #[tokio::test]
    async fn higher_priority_plays_before_lower_even_if_enqueued_later() {
        let seq = Sequencer::new(4, 1);
        seq.enqueue(vec![0; 4], persona(), SegmentPriority::Low, "low", 0).await;
        seq.enqueue(vec![1; 4], persona(), SegmentPriority::Critical, "critical", 0).await;

        let order: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
        let order_cl = order.clone();
        seq.play(|chunk| {
            let order = order_cl.clone();
            async move {
                order.lock().unwrap().push(chunk[0]);
            }
        })
        .await;

        assert_eq!(*order.lock().unwrap(), vec![1, 0]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let seq = Sequencer::new(4, 1);
        seq.enqueue(vec![1; 4], persona(), SegmentPriority::Normal, "a", 0).await;
        seq.enqueue(vec![2; 4], persona(), SegmentPriority::Normal, "b", 0).await;

        let order: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
        let order_cl = order.clone();
        seq.play(|chunk| {
            let order = order_cl.clone();
            async move {
                order.lock().unwrap().push(chunk[0]);
            }
        })
        .await;

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn stop_clears_queue_and_counts_barge_in() {
        let seq = Sequencer::new(4, 50);
        seq.enqueue(vec![1; 8], persona(), SegmentPriority::Normal, "a", 0).await;
        seq.stop().await;
        assert!(seq.is_empty().await);
        assert_eq!(seq.barge_in_count(), 1);
    }
}
