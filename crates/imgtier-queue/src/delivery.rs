//! Deliveries and their terminal actions.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use imgtier_models::ProcessingTask;
use tracing::{error, warn};

use crate::error::{QueueError, QueueResult};

/// How a delivery is given back to the broker when it is not acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rejection {
    /// Put the message back for another delivery.
    Requeue,
    /// Drop the message, or dead-letter it when the queue has a DLX.
    #[default]
    Discard,
}

impl Rejection {
    pub fn requeue(self) -> bool {
        matches!(self, Rejection::Requeue)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Requeue => write!(f, "requeue"),
            Rejection::Discard => write!(f, "discard"),
        }
    }
}

impl FromStr for Rejection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requeue" => Ok(Rejection::Requeue),
            "discard" => Ok(Rejection::Discard),
            other => Err(format!("unknown rejection policy: {}", other)),
        }
    }
}

/// Broker-side settlement of one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> QueueResult<()>;
    async fn reject(&self, rejection: Rejection) -> QueueResult<()>;
}

/// Handle to an unsettled delivery.
///
/// `ack` and `reject` take the handle by value, so a delivery is settled
/// at most once. Dropping a handle leaves the message unacknowledged until
/// the channel closes, at which point the broker redelivers it.
pub struct DeliveryHandle {
    acker: Box<dyn Acknowledger>,
    delivery_tag: u64,
    redelivered: bool,
}

impl DeliveryHandle {
    pub fn new(acker: impl Acknowledger + 'static, delivery_tag: u64, redelivered: bool) -> Self {
        Self {
            acker: Box::new(acker),
            delivery_tag,
            redelivered,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker delivered this message before.
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(self) -> QueueResult<()> {
        self.acker.ack().await
    }

    pub async fn reject(self, rejection: Rejection) -> QueueResult<()> {
        self.acker.reject(rejection).await
    }
}

impl fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// A decoded task together with its handle.
#[derive(Debug)]
pub struct Delivery {
    pub task: ProcessingTask,
    pub handle: DeliveryHandle,
}

/// Infinite stream of deliveries from one consumer.
pub type TaskStream = BoxStream<'static, QueueResult<Delivery>>;

/// Raw message as it comes off a consumer, before decoding.
pub(crate) struct RawDelivery {
    pub payload: Vec<u8>,
    pub handle: DeliveryHandle,
}

/// Decode a raw delivery, settling undecodable ones with `policy`.
///
/// Returns `None` when the message was malformed and has been rejected,
/// so callers can use it directly with `filter_map`.
pub(crate) async fn decode_delivery(
    raw: QueueResult<RawDelivery>,
    policy: Rejection,
) -> Option<QueueResult<Delivery>> {
    let RawDelivery { payload, handle } = match raw {
        Ok(raw) => raw,
        Err(e) => return Some(Err(e)),
    };

    let decoded = ProcessingTask::from_payload(&payload)
        .map_err(|e| e.to_string())
        .and_then(|task| task.id.validate().map(|_| task).map_err(|e| e.to_string()));

    match decoded {
        Ok(task) => Some(Ok(Delivery { task, handle })),
        Err(reason) => {
            let tag = handle.delivery_tag();
            match policy {
                Rejection::Discard => error!(
                    delivery_tag = tag,
                    payload_len = payload.len(),
                    "Discarding malformed task payload (message lost): {}",
                    reason
                ),
                Rejection::Requeue => warn!(
                    delivery_tag = tag,
                    "Requeueing malformed task payload: {}", reason
                ),
            }

            match handle.reject(policy).await {
                Ok(()) => None,
                Err(e) => Some(Err(QueueError::ack_failed(format!(
                    "rejecting malformed delivery {}: {}",
                    tag, e
                )))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Acknowledger for Recorder {
        async fn ack(&self) -> QueueResult<()> {
            self.0.lock().unwrap().push("ack".to_string());
            Ok(())
        }

        async fn reject(&self, rejection: Rejection) -> QueueResult<()> {
            self.0.lock().unwrap().push(rejection.to_string());
            Ok(())
        }
    }

    fn raw(payload: &[u8], recorder: &Recorder) -> QueueResult<RawDelivery> {
        Ok(RawDelivery {
            payload: payload.to_vec(),
            handle: DeliveryHandle::new(recorder.clone(), 7, false),
        })
    }

    #[test]
    fn test_rejection_parse() {
        assert_eq!("discard".parse::<Rejection>().unwrap(), Rejection::Discard);
        assert_eq!("REQUEUE".parse::<Rejection>().unwrap(), Rejection::Requeue);
        assert!("drop".parse::<Rejection>().is_err());
        assert!(Rejection::Requeue.requeue());
        assert!(!Rejection::Discard.requeue());
    }

    #[tokio::test]
    async fn test_decode_valid_payload() {
        let recorder = Recorder::default();
        let payload = br#"{"id":"a1b2","filePath":"/s/a1/a1b2_100.jpg"}"#;

        let delivery = decode_delivery(raw(payload, &recorder), Rejection::Discard)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delivery.task.id.as_str(), "a1b2");
        assert_eq!(delivery.handle.delivery_tag(), 7);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_settled_with_policy() {
        let recorder = Recorder::default();
        assert!(decode_delivery(raw(b"not json", &recorder), Rejection::Discard)
            .await
            .is_none());
        assert!(decode_delivery(raw(b"{}", &recorder), Rejection::Requeue)
            .await
            .is_none());

        assert_eq!(*recorder.0.lock().unwrap(), vec!["discard", "requeue"]);
    }

    #[tokio::test]
    async fn test_unusable_id_is_malformed() {
        let recorder = Recorder::default();
        let payload = br#"{"id":"../x","filePath":""}"#;
        assert!(decode_delivery(raw(payload, &recorder), Rejection::Discard)
            .await
            .is_none());
        assert_eq!(*recorder.0.lock().unwrap(), vec!["discard"]);
    }

    #[tokio::test]
    async fn test_stream_errors_pass_through() {
        let result = decode_delivery(Err(QueueError::Closed), Rejection::Discard).await;
        assert!(matches!(result, Some(Err(QueueError::Closed))));
    }
}
