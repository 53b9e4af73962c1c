use serde::Serialize;
use tokio::sync::mpsc;

/// Speaker activity published for displays and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakerStatus {
    /// Short speaker tag: the last two characters of the speaker id.
    pub current: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl SpeakerStatus {
    pub fn heard(speaker: &str, message: impl Into<String>) -> Self {
        Self { current: short_tag(speaker), message: message.into(), response: None }
    }

    pub fn answered(speaker: &str, message: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            current: short_tag(speaker),
            message: message.into(),
            response: Some(response.into()),
        }
    }
}

fn short_tag(speaker: &str) -> String {
    let n = speaker.chars().count();
    speaker.chars().skip(n.saturating_sub(2)).collect()
}

/// Fire-and-forget status sink. `publish` must never block or fail the caller.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, status: SpeakerStatus);
}

pub type StatusReceiver = mpsc::Receiver<SpeakerStatus>;

/// Publishes into a bounded channel; drops updates when the consumer lags.
#[derive(Debug, Clone)]
pub struct ChannelStatusPublisher {
    tx: mpsc::Sender<SpeakerStatus>,
}

impl StatusPublisher for ChannelStatusPublisher {
    fn publish(&self, status: SpeakerStatus) {
        if let Err(e) = self.tx.try_send(status) {
            tracing::debug!(error = %e, "status update dropped");
        }
    }
}

/// Create a status channel with the given buffer size.
pub fn channel(buffer: usize) -> (ChannelStatusPublisher, StatusReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelStatusPublisher { tx }, rx)
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatus;

impl StatusPublisher for NoopStatus {
    fn publish(&self, _status: SpeakerStatus) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_is_last_two_chars() {
        assert_eq!(SpeakerStatus::heard("AA:BB:CC:01", "hi").current, "01");
        assert_eq!(SpeakerStatus::heard("x", "hi").current, "x");
    }

    #[test]
    fn heard_omits_response() {
        let v = serde_json::to_value(SpeakerStatus::heard("s-07", "lights on")).unwrap();
        assert_eq!(v, json!({"current": "07", "message": "lights on"}));
    }

    #[tokio::test]
    async fn channel_send_recv() {
        let (publisher, mut rx) = channel(4);
        publisher.publish(SpeakerStatus::answered("s-07", "lights on", "Done."));
        let status = rx.recv().await.unwrap();
        assert_eq!(status.response.as_deref(), Some("Done."));
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (publisher, _rx) = channel(1);
        publisher.publish(SpeakerStatus::heard("s1", "one"));
        publisher.publish(SpeakerStatus::heard("s1", "two"));
    }
}
