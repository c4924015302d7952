//! In-process task channel.
//!
//! Mirrors the broker semantics the worker depends on: unsettled deliveries
//! return to the queue when the channel drops, requeued messages come back
//! flagged as redelivered, and discarded messages are kept as dead letters
//! for inspection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use imgtier_models::ProcessingTask;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::channel::TaskChannel;
use crate::delivery::{decode_delivery, Acknowledger, DeliveryHandle, RawDelivery, Rejection, TaskStream};
use crate::error::{QueueError, QueueResult};

struct Message {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Message>,
    unacked: BTreeMap<u64, Vec<u8>>,
    dead_letters: Vec<Vec<u8>>,
    next_tag: u64,
    /// Bumped on every disconnect; handles from an older epoch are stale.
    epoch: u64,
    disconnected: bool,
    closed: bool,
    consuming: bool,
    published: u64,
    acked: u64,
    requeued: u64,
    discarded: u64,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Counters stay meaningful even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Task channel living entirely in memory.
///
/// Clones share the same queue, so a test can keep one clone for
/// inspection while handing another to the code under test.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
    malformed_policy: Rejection,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_malformed_policy(mut self, policy: Rejection) -> Self {
        self.malformed_policy = policy;
        self
    }

    /// Enqueue raw bytes, bypassing serialization.
    pub fn publish_raw(&self, payload: impl Into<Vec<u8>>) -> QueueResult<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.disconnected {
            return Err(QueueError::connection_failed("memory channel disconnected"));
        }
        state.ready.push_back(Message {
            payload: payload.into(),
            redelivered: false,
        });
        state.published += 1;
        drop(state);

        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Simulate a lost connection.
    ///
    /// The active consumer stream yields an error and ends, and every
    /// unsettled delivery goes back to the front of the queue.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.disconnected = true;
        state.consuming = false;
        state.epoch += 1;

        let unacked = std::mem::take(&mut state.unacked);
        for (_, payload) in unacked.into_iter().rev() {
            state.ready.push_front(Message {
                payload,
                redelivered: true,
            });
        }
        drop(state);

        warn!("Memory channel disconnected");
        self.inner.notify.notify_waiters();
    }

    /// Restore a channel after `disconnect`.
    pub fn reconnect(&self) {
        self.inner.lock().disconnected = false;
        debug!("Memory channel reconnected");
    }

    /// Messages waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.inner.lock().ready.len()
    }

    /// Messages delivered but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    pub fn published(&self) -> u64 {
        self.inner.lock().published
    }

    pub fn acked(&self) -> u64 {
        self.inner.lock().acked
    }

    pub fn requeued(&self) -> u64 {
        self.inner.lock().requeued
    }

    pub fn discarded(&self) -> u64 {
        self.inner.lock().discarded
    }

    /// Payloads rejected with `Rejection::Discard`, oldest first.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.inner.lock().dead_letters.clone()
    }
}

/// The single consumer slot, held by a live stream.
///
/// Dropping the stream frees the slot unless a disconnect or close already
/// did and a newer consumer has taken it.
struct ConsumerSlot {
    inner: Arc<Inner>,
    epoch: u64,
}

impl Drop for ConsumerSlot {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if state.epoch == self.epoch {
            state.consuming = false;
        }
    }
}

/// Wait for the next message of the consumer started in `epoch`.
async fn next_message(inner: &Arc<Inner>, epoch: u64) -> Option<QueueResult<RawDelivery>> {
    loop {
        // Registered before checking state so a concurrent notify is not lost
        let notified = inner.notify.notified();
        {
            let mut state = inner.lock();
            if state.closed {
                return None;
            }
            if state.disconnected || state.epoch != epoch {
                return Some(Err(QueueError::connection_failed(
                    "memory channel disconnected",
                )));
            }
            if let Some(message) = state.ready.pop_front() {
                state.next_tag += 1;
                let tag = state.next_tag;
                state.unacked.insert(tag, message.payload.clone());

                let acker = MemoryAcker {
                    inner: Arc::clone(inner),
                    tag,
                    epoch,
                };
                return Some(Ok(RawDelivery {
                    payload: message.payload,
                    handle: DeliveryHandle::new(acker, tag, message.redelivered),
                }));
            }
        }
        notified.await;
    }
}

#[async_trait]
impl TaskChannel for MemoryChannel {
    async fn publish(&self, task: &ProcessingTask) -> QueueResult<()> {
        self.publish_raw(task.to_payload()?)
    }

    async fn consume(&self) -> QueueResult<TaskStream> {
        let epoch = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.disconnected {
                return Err(QueueError::connection_failed("memory channel disconnected"));
            }
            if state.consuming {
                return Err(QueueError::consume_failed("a consumer is already active"));
            }
            state.consuming = true;
            state.epoch
        };

        let policy = self.malformed_policy;
        let slot = ConsumerSlot {
            inner: Arc::clone(&self.inner),
            epoch,
        };
        let stream = stream::unfold((slot, false), move |(slot, done)| async move {
            if done {
                return None;
            }
            let item = next_message(&slot.inner, epoch).await?;
            let done = item.is_err();
            Some((item, (slot, done)))
        })
        .filter_map(move |raw| decode_delivery(raw, policy))
        .boxed();

        Ok(stream)
    }

    async fn close(&self) -> QueueResult<()> {
        let mut state = self.inner.lock();
        state.closed = true;
        state.consuming = false;
        state.epoch += 1;

        let unacked = std::mem::take(&mut state.unacked);
        for (_, payload) in unacked.into_iter().rev() {
            state.ready.push_front(Message {
                payload,
                redelivered: true,
            });
        }
        drop(state);

        self.inner.notify.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.inner.lock();
        !state.closed && !state.disconnected
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    tag: u64,
    epoch: u64,
}

impl MemoryAcker {
    fn settle(&self, state: &mut State) -> QueueResult<Vec<u8>> {
        if state.epoch != self.epoch {
            return Err(QueueError::ack_failed(format!(
                "delivery {} belongs to a closed consumer",
                self.tag
            )));
        }
        state
            .unacked
            .remove(&self.tag)
            .ok_or_else(|| QueueError::ack_failed(format!("unknown delivery tag {}", self.tag)))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> QueueResult<()> {
        let mut state = self.inner.lock();
        self.settle(&mut state)?;
        state.acked += 1;
        Ok(())
    }

    async fn reject(&self, rejection: Rejection) -> QueueResult<()> {
        {
            let mut state = self.inner.lock();
            let payload = self.settle(&mut state)?;
            match rejection {
                Rejection::Requeue => {
                    state.requeued += 1;
                    state.ready.push_back(Message {
                        payload,
                        redelivered: true,
                    });
                }
                Rejection::Discard => {
                    state.discarded += 1;
                    state.dead_letters.push(payload);
                }
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
