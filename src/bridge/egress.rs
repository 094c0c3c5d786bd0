/// Per-client outbound queue
///
/// Bounded, drop-oldest on overflow. Producers never wait; the client's writer
/// task is the single consumer.
use super::frame::WsFrame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<WsFrame>,
    closed: bool,
}

#[derive(Debug)]
pub struct EgressQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

/// Outcome of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest frame
    DroppedOldest,
    Closed,
}

impl EgressQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, frame: WsFrame) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let outcome = if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            state.frames.push_back(frame);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Control frames jump the queue and never evict data
    pub fn push_control(&self, frame: WsFrame) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.frames.push_front(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Next frame; after `close` the remaining frames drain, then `None`
    pub async fn pop(&self) -> Option<WsFrame> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> WsFrame {
        WsFrame::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let queue = EgressQueue::new(2);
        assert_eq!(queue.push(text("a")), PushOutcome::Queued);
        assert_eq!(queue.push(text("b")), PushOutcome::Queued);
        assert_eq!(queue.push(text("c")), PushOutcome::DroppedOldest);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, Some(text("b")));
        assert_eq!(queue.pop().await, Some(text("c")));
    }

    #[tokio::test]
    async fn test_control_frames_go_first() {
        let queue = EgressQueue::new(4);
        queue.push(text("a"));
        queue.push_control(WsFrame::Ping(Vec::new()));
        assert_eq!(queue.pop().await, Some(WsFrame::Ping(Vec::new())));
        assert_eq!(queue.pop().await, Some(text("a")));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = EgressQueue::new(4);
        queue.push(text("last"));
        queue.close();
        assert_eq!(queue.push(text("late")), PushOutcome::Closed);
        assert_eq!(queue.pop().await, Some(text("last")));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(EgressQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(text("x"));
        assert_eq!(consumer.await.unwrap(), Some(text("x")));
    }
}
