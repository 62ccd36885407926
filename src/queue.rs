//! Shared machine-identifier queue (thread-safe).
//!
//! All workers pull from the same backlog: worker A takes entry 0, worker B
//! takes entry 1, whichever finishes first takes entry 2, and so on until
//! the backlog is exhausted. Delivery is exactly-once and in backlog order;
//! once the queue reports empty it stays empty — the backlog is seeded once
//! and never refilled.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

/// Shared FIFO of pending machine identifiers.
///
/// The backlog itself is immutable; a single mutex guards the advancing
/// cursor and the per-worker consumption history. Lock-free structures are
/// deliberately avoided — contention is negligible and exactly-once,
/// in-order delivery is the point, not throughput.
#[derive(Debug)]
pub struct TaskQueue {
    backlog: Vec<String>,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_index: usize,
    worker_history: HashMap<String, Vec<String>>,
}

impl TaskQueue {
    /// Create a queue over the given backlog of machine identifiers.
    pub fn new(backlog: Vec<String>) -> Self {
        info!("[TaskQueue] seeded with {} machine identifiers", backlog.len());
        for (i, code) in backlog.iter().enumerate() {
            info!("[TaskQueue]   [{}] {}", i + 1, code);
        }
        Self {
            backlog,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Take the next identifier for `worker_id`.
    ///
    /// Returns `None` once the backlog is exhausted; `None` is permanent.
    pub fn take(&self, worker_id: &str) -> Option<String> {
        let mut state = self.state.lock().expect("queue mutex poisoned");

        if state.next_index >= self.backlog.len() {
            info!("[TaskQueue] {} requested work - queue empty", worker_id);
            return None;
        }

        let code = self.backlog[state.next_index].clone();
        state.next_index += 1;
        let position = state.next_index;

        if !worker_id.is_empty() {
            state
                .worker_history
                .entry(worker_id.to_string())
                .or_default()
                .push(code.clone());
        }

        info!(
            "[TaskQueue] {} took machine [{}/{}]: {}",
            worker_id,
            position,
            self.backlog.len(),
            code
        );
        Some(code)
    }

    /// Number of identifiers not yet delivered.
    pub fn remaining_count(&self) -> usize {
        let state = self.state.lock().expect("queue mutex poisoned");
        self.backlog.len().saturating_sub(state.next_index)
    }

    /// Progress string, e.g. `"3/10"`.
    pub fn progress(&self) -> String {
        let state = self.state.lock().expect("queue mutex poisoned");
        format!("{}/{}", state.next_index, self.backlog.len())
    }

    /// Identifiers delivered to each worker so far, in delivery order.
    pub fn history(&self) -> HashMap<String, Vec<String>> {
        let state = self.state.lock().expect("queue mutex poisoned");
        state
            .worker_history
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether every backlog entry has been delivered.
    pub fn is_done(&self) -> bool {
        let state = self.state.lock().expect("queue mutex poisoned");
        state.next_index >= self.backlog.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_delivers_in_order() {
        let queue = TaskQueue::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(queue.take("w1").as_deref(), Some("a"));
        assert_eq!(queue.take("w2").as_deref(), Some("b"));
        assert_eq!(queue.take("w1").as_deref(), Some("c"));
        assert_eq!(queue.take("w1"), None);
        assert_eq!(queue.take("w2"), None);
        assert!(queue.is_done());
    }

    #[test]
    fn test_empty_is_permanent() {
        let queue = TaskQueue::new(vec!["only".into()]);
        assert!(queue.take("w").is_some());
        for _ in 0..5 {
            assert!(queue.take("w").is_none());
        }
    }

    #[test]
    fn test_progress_and_remaining() {
        let queue = TaskQueue::new(vec!["a".into(), "b".into()]);
        assert_eq!(queue.progress(), "0/2");
        assert_eq!(queue.remaining_count(), 2);
        queue.take("w");
        assert_eq!(queue.progress(), "1/2");
        assert_eq!(queue.remaining_count(), 1);
    }

    #[test]
    fn test_history_tracks_per_worker() {
        let queue = TaskQueue::new(vec!["a".into(), "b".into(), "c".into()]);
        queue.take("w1");
        queue.take("w2");
        queue.take("w1");
        let history = queue.history();
        assert_eq!(history["w1"], vec!["a".to_string(), "c".to_string()]);
        assert_eq!(history["w2"], vec!["b".to_string()]);
    }

    #[test]
    fn test_exactly_once_under_concurrency() {
        let backlog: Vec<String> = (0..100).map(|i| format!("873-GAME-{:04}", i)).collect();
        let queue = Arc::new(TaskQueue::new(backlog.clone()));

        let mut handles = Vec::new();
        for w in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                let worker_id = format!("w{}", w);
                let mut taken = Vec::new();
                while let Some(code) = queue.take(&worker_id) {
                    taken.push(code);
                }
                taken
            }));
        }

        let mut all: Vec<String> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        // Exactly N deliveries in total, each identifier exactly once.
        assert_eq!(all.len(), backlog.len());
        let mut sorted = all.clone();
        sorted.sort();
        let mut expected = backlog.clone();
        expected.sort();
        assert_eq!(sorted, expected);
        assert!(queue.is_done());
        assert_eq!(queue.remaining_count(), 0);
    }
}
