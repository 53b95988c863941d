//! Rate-limited sender.
//!
//! One task drains the outbound queue onto the [`Transport`]:
//!
//! 1. Take the next item (a failed write waits at the front of the queue).
//! 2. Wait until fewer than `max_sends` writes fall inside the trailing
//!    `window`.
//! 3. Drop chat messages the [`SendPolicy`] refuses. Raw protocol lines are
//!    never gated.
//! 4. Write, record the send time, sleep a random pacing delay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::Transport;
use crate::error::{EngineError, EngineResult};
use crate::foundation::{Outbound, OutboundMessage};

/// Sliding-window and pacing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Maximum writes inside one window.
    pub max_sends: usize,
    /// Length of the trailing window.
    pub window: Duration,
    /// Lower bound of the pause after each write.
    pub pacing_min: Duration,
    /// Upper bound of the pause after each write.
    pub pacing_max: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_sends: 20,
            window: Duration::from_secs(30),
            pacing_min: Duration::from_millis(500),
            pacing_max: Duration::from_millis(1500),
        }
    }
}

impl SenderConfig {
    /// Configuration without pacing delays.
    pub fn unpaced(max_sends: usize, window: Duration) -> Self {
        Self {
            max_sends,
            window,
            pacing_min: Duration::ZERO,
            pacing_max: Duration::ZERO,
        }
    }

    fn pacing(&self) -> Duration {
        if self.pacing_max <= self.pacing_min {
            self.pacing_min
        } else {
            rand::thread_rng().gen_range(self.pacing_min..=self.pacing_max)
        }
    }
}

/// Decides whether a chat message may go out right now.
pub trait SendPolicy: Send + Sync + 'static {
    fn allows(&self, message: &OutboundMessage) -> bool;
}

impl<F> SendPolicy for F
where
    F: Fn(&OutboundMessage) -> bool + Send + Sync + 'static,
{
    fn allows(&self, message: &OutboundMessage) -> bool {
        self(message)
    }
}

/// A policy that allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SendPolicy for AllowAll {
    fn allows(&self, _message: &OutboundMessage) -> bool {
        true
    }
}

struct SenderShared {
    pending: AtomicUsize,
    idle: Notify,
}

impl SenderShared {
    fn resolve(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle for enqueueing outbound traffic.
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    shared: Arc<SenderShared>,
}

impl std::fmt::Debug for SenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

impl SenderHandle {
    /// Queues a chat message.
    pub fn enqueue(&self, message: OutboundMessage) -> EngineResult<()> {
        self.push(Outbound::Chat(message))
    }

    /// Queues a protocol line (no terminator).
    pub fn enqueue_raw(&self, line: impl Into<String>) -> EngineResult<()> {
        self.push(Outbound::Raw(line.into()))
    }

    fn push(&self, item: Outbound) -> EngineResult<()> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(item).map_err(|_| {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            EngineError::QueueClosed
        })
    }

    /// Items queued but not yet written or dropped.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Waits until the queue is empty. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.shared.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Spawns sender tasks.
pub struct Sender;

impl Sender {
    /// Spawns the sender task. It stops when `shutdown` is cancelled or every
    /// handle is dropped.
    pub fn spawn(
        config: SenderConfig,
        policy: Arc<dyn SendPolicy>,
        transport: Transport,
        shutdown: CancellationToken,
    ) -> (SenderHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SenderShared {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let worker = SenderLoop {
            config,
            policy,
            transport,
            rx,
            backlog: VecDeque::new(),
            sent: VecDeque::new(),
            shared: Arc::clone(&shared),
            shutdown,
        };
        let task = tokio::spawn(worker.run());

        (SenderHandle { tx, shared }, task)
    }
}

struct SenderLoop {
    config: SenderConfig,
    policy: Arc<dyn SendPolicy>,
    transport: Transport,
    rx: mpsc::UnboundedReceiver<Outbound>,
    /// Items whose write failed, retried before anything new.
    backlog: VecDeque<Outbound>,
    /// Send times inside the current window, oldest first.
    sent: VecDeque<Instant>,
    shared: Arc<SenderShared>,
    shutdown: CancellationToken,
}

impl SenderLoop {
    async fn run(mut self) {
        debug!(
            max_sends = self.config.max_sends,
            window_secs = self.config.window.as_secs_f64(),
            "Sender started"
        );

        while let Some(item) = self.next_item().await {
            if !self.wait_for_slot().await {
                break;
            }

            if let Outbound::Chat(message) = &item
                && !self.policy.allows(message)
            {
                debug!(
                    channel = %message.channel,
                    kind = %message.kind,
                    "Dropping message disabled for channel"
                );
                self.shared.resolve();
                continue;
            }

            let wire = item.to_wire();
            match self.transport.write(&wire).await {
                Ok(()) => {
                    self.sent.push_back(Instant::now());
                    info!(line = %wire.trim_end(), "Sent");
                    self.shared.resolve();
                    if !self.pause(self.config.pacing()).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Write failed, message requeued");
                    self.backlog.push_front(item);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.transport.wait_connected() => {}
                    }
                }
            }
        }

        debug!(unsent = self.shared.pending.load(Ordering::Acquire), "Sender stopped");
    }

    async fn next_item(&mut self) -> Option<Outbound> {
        if let Some(item) = self.backlog.pop_front() {
            return Some(item);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Waits for room in the sliding window. Returns `false` on shutdown.
    async fn wait_for_slot(&mut self) -> bool {
        loop {
            let now = Instant::now();
            while self
                .sent
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.config.window)
            {
                self.sent.pop_front();
            }

            let Some(&oldest) = self.sent.front() else {
                return true;
            };
            if self.sent.len() < self.config.max_sends {
                return true;
            }

            let until = oldest + self.config.window;
            debug!(
                wait_ms = until.saturating_duration_since(now).as_millis() as u64,
                "Send window full"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = sleep_until(until) => {}
            }
        }
    }

    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.shutdown.is_cancelled();
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }
}
