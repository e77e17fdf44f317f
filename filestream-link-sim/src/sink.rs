use async_trait::async_trait;
use tokio::sync::mpsc;

// ---

use filestream_domain::{ChannelEvent, ChannelSink, FileStreamError, Result};

// ---------------------------------------------------------------------------
// LinkSimSink
// ---------------------------------------------------------------------------

/// Agent-side outbound half of a simulated channel.
///
/// Every call becomes one [`ChannelEvent`] on the peer's receiver. After a
/// terminal signal further calls fail with [`FileStreamError::ChannelClosed`],
/// as does any call once the peer has dropped its end.
pub(crate) struct LinkSimSink<T> {
    // ---
    tx: mpsc::UnboundedSender<ChannelEvent<T>>,
    closed: bool,

    /// `send` fails with a transport error; terminal signals still go out.
    broken: bool,
}

// ---

impl<T> LinkSimSink<T> {
    // ---
    pub(crate) fn new(tx: mpsc::UnboundedSender<ChannelEvent<T>>) -> Self {
        Self {
            tx,
            closed: false,
            broken: false,
        }
    }

    // ---

    pub(crate) fn broken(tx: mpsc::UnboundedSender<ChannelEvent<T>>) -> Self {
        Self {
            broken: true,
            ..Self::new(tx)
        }
    }

    // ---

    fn deliver(&mut self, event: ChannelEvent<T>) -> Result<()> {
        // ---
        if self.closed {
            return Err(FileStreamError::ChannelClosed);
        }
        if event.is_terminal() {
            self.closed = true;
        }
        self.tx
            .send(event)
            .map_err(|_| FileStreamError::ChannelClosed)
    }
}

// ---

#[async_trait]
impl<T: Send + 'static> ChannelSink<T> for LinkSimSink<T> {
    // ---
    async fn send(&mut self, msg: T) -> Result<()> {
        // ---
        if self.broken && !self.closed {
            return Err(FileStreamError::Transport("link-sim: send failed".into()));
        }
        self.deliver(ChannelEvent::Message(msg))
    }

    async fn complete(&mut self) -> Result<()> {
        self.deliver(ChannelEvent::Completed)
    }

    async fn fail(&mut self, reason: &str) -> Result<()> {
        self.deliver(ChannelEvent::Error(reason.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn nothing_is_delivered_after_completion() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = LinkSimSink::new(tx);

        sink.send(1u32).await.unwrap();
        sink.complete().await.unwrap();
        assert!(matches!(
            sink.send(2).await,
            Err(FileStreamError::ChannelClosed)
        ));
        assert!(sink.fail("late").await.is_err());

        assert_eq!(rx.recv().await, Some(ChannelEvent::Message(1)));
        assert_eq!(rx.recv().await, Some(ChannelEvent::Completed));
        assert!(rx.try_recv().is_err());
    }

    // ---

    #[tokio::test]
    async fn broken_sink_refuses_messages_but_completes() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = LinkSimSink::broken(tx);

        assert!(matches!(
            sink.send(1u32).await,
            Err(FileStreamError::Transport(_))
        ));
        sink.complete().await.unwrap();
        assert!(matches!(
            sink.send(2).await,
            Err(FileStreamError::ChannelClosed)
        ));
        assert_eq!(rx.recv().await, Some(ChannelEvent::Completed));
    }

    // ---

    #[tokio::test]
    async fn send_fails_once_peer_is_gone() {
        // ---
        let (tx, rx) = mpsc::unbounded_channel::<ChannelEvent<u32>>();
        drop(rx);
        let mut sink = LinkSimSink::new(tx);
        assert!(sink.send(7).await.is_err());
    }
}
