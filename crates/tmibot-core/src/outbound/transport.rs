//! The write half of the server connection, shared between the connection
//! supervisor (which attaches and detaches it) and the sender (which writes).

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};

/// A type-erased write half.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct TransportInner {
    writer: Mutex<Option<BoxedWriter>>,
    connected: watch::Sender<bool>,
}

/// Cloneable slot holding the current connection's writer, if any.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport {
    /// Creates a disconnected transport.
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(TransportInner {
                writer: Mutex::new(None),
                connected,
            }),
        }
    }

    /// Writes `preamble` to `writer`, then installs it as the current writer.
    ///
    /// Nothing else can be written until the preamble is out, so login lines
    /// always precede queued traffic.
    pub async fn attach<W>(&self, writer: W, preamble: &[String]) -> TransportResult<()>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut slot = self.inner.writer.lock().await;
        let mut writer: BoxedWriter = Box::new(writer);
        for line in preamble {
            info!(line = %redact(line), "Sending login line");
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
        }
        writer.flush().await?;

        *slot = Some(writer);
        self.inner.connected.send_replace(true);
        debug!("Transport attached");
        Ok(())
    }

    /// Removes and shuts down the current writer, if any.
    pub async fn detach(&self) {
        let writer = self.inner.writer.lock().await.take();
        self.inner.connected.send_replace(false);
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
            debug!("Transport detached");
        }
    }

    /// Whether a writer is attached.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Resolves once a writer is attached.
    pub async fn wait_connected(&self) {
        let mut rx = self.inner.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Writes exact bytes to the current writer.
    ///
    /// A failed write drops the writer; the supervisor is expected to
    /// reconnect and attach a new one.
    pub async fn write(&self, data: &str) -> TransportResult<()> {
        let mut slot = self.inner.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result = async {
            writer.write_all(data.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            *slot = None;
            self.inner.connected.send_replace(false);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Hides the credential in a `PASS` line.
pub fn redact(line: &str) -> &str {
    if line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("PASS ")) {
        "PASS ********"
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn preamble_precedes_writes() {
        let (client, mut server) = tokio::io::duplex(1024);
        let transport = Transport::new();
        assert!(matches!(
            transport.write("x").await,
            Err(TransportError::NotConnected)
        ));

        transport
            .attach(client, &["PASS oauth:secret".into(), "NICK bot".into()])
            .await
            .unwrap();
        assert!(transport.is_connected());
        transport.write("JOIN #a\r\n").await.unwrap();
        transport.detach().await;

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "PASS oauth:secret\r\nNICK bot\r\nJOIN #a\r\n");
        assert!(!transport.is_connected());
    }

    #[test]
    fn pass_lines_are_redacted() {
        assert_eq!(redact("PASS oauth:abc"), "PASS ********");
        assert_eq!(redact("pass oauth:abc"), "PASS ********");
        assert_eq!(redact("NICK bot"), "NICK bot");
    }
}
