//! Connection supervision: connect with backoff, log in, read and dispatch
//! until the connection ends, then reconnect.
//!
//! ```text
//! connect_with_retry ──→ Session::run ──→ SessionEnd
//!        ↑                                   │
//!        └────────── Closed (reconnect) ─────┘
//! ```

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tmibot_core::{Classifier, Engine, LineCodec, TransportError};

use crate::config::{ConnectionConfig, RetryConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Why a session stopped reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The engine's shutdown token was cancelled.
    Shutdown,
    /// The server rejected the login.
    LoginFailed { reason: String },
    /// The stream ended or failed; a reconnect may follow.
    Closed { reason: String },
}

// =============================================================================
// Session
// =============================================================================

/// One connection's lifetime: login, re-join, read loop.
pub struct Session {
    engine: Engine,
    login: Vec<String>,
    classifier: Classifier,
}

impl Session {
    pub fn new(engine: Engine, login: Vec<String>) -> Self {
        let classifier = Classifier::new(&engine.identity().nickname);
        Self {
            engine,
            login,
            classifier,
        }
    }

    /// Runs the session over `stream`.
    ///
    /// The login lines go out before anything queued, then every joined
    /// channel is re-joined. Events are dispatched strictly in arrival order.
    /// On [`SessionEnd::Closed`] the writer has already been detached.
    pub async fn run<S>(&self, stream: S) -> RuntimeResult<SessionEnd>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.engine.transport().attach(writer, &self.login).await?;
        let rejoined = self.engine.rejoin_all()?;
        info!(channels = rejoined, "Logged in");

        let shutdown = self.engine.shutdown_token();
        let mut frames = FramedRead::new(reader, LineCodec::new());

        let end = loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                frame = frames.next() => frame,
            };

            match frame {
                Some(Ok(line)) => {
                    trace!(line = %line, "Received");
                    let event = self.classifier.classify(&line);
                    let report = self.engine.dispatch(event).await;
                    if report.fatal {
                        break SessionEnd::LoginFailed { reason: line };
                    }
                }
                Some(Err(e)) => {
                    break SessionEnd::Closed {
                        reason: TransportError::from(e).to_string(),
                    };
                }
                None => {
                    break SessionEnd::Closed {
                        reason: "server closed the connection".to_string(),
                    };
                }
            }
        };

        if matches!(end, SessionEnd::Closed { .. }) {
            self.engine.transport().detach().await;
        }
        debug!(end = ?end, "Session ended");
        Ok(end)
    }
}

// =============================================================================
// Connecting
// =============================================================================

/// Connects to `addr`, retrying with exponential backoff.
///
/// Returns `Ok(None)` if `shutdown` fires first, and
/// [`RuntimeError::GaveUp`] once `retry.max_retries` consecutive attempts
/// have failed.
pub async fn connect_with_retry(
    addr: &str,
    retry: &RetryConfig,
    shutdown: &CancellationToken,
) -> RuntimeResult<Option<TcpStream>> {
    let mut failures: u32 = 0;
    let mut delay = retry.initial_delay();

    loop {
        let attempt = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(None),
            attempt = TcpStream::connect(addr) => attempt,
        };

        match attempt {
            Ok(stream) => {
                info!(addr = %addr, "Connected");
                return Ok(Some(stream));
            }
            Err(e) => {
                failures += 1;
                let err = TransportError::ConnectionFailed {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, attempt = failures, "Connection attempt failed");

                if retry.max_retries.is_some_and(|max| failures >= max) {
                    error!(addr = %addr, "Max retries reached, giving up");
                    return Err(RuntimeError::GaveUp {
                        addr: addr.to_string(),
                        attempts: failures,
                    });
                }
            }
        }

        warn!(delay = ?delay, "Reconnecting...");
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = retry.next_delay(delay);
    }
}

/// Keeps the engine connected until shutdown, login failure, or give-up.
pub struct Supervisor {
    engine: Engine,
    config: ConnectionConfig,
}

impl Supervisor {
    pub fn new(engine: Engine, config: ConnectionConfig) -> Self {
        Self { engine, config }
    }

    /// Runs connect → session → reconnect until something terminal happens.
    pub async fn run(&self) -> RuntimeResult<SessionEnd> {
        let addr = self.config.address();
        let shutdown = self.engine.shutdown_token();
        let session = Session::new(self.engine.clone(), self.config.login_lines());

        loop {
            let Some(stream) = connect_with_retry(&addr, &self.config.retry, &shutdown).await?
            else {
                return Ok(SessionEnd::Shutdown);
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Could not disable Nagle's algorithm");
            }

            let end = match session.run(stream).await {
                Ok(end) => end,
                Err(RuntimeError::Transport(e)) => SessionEnd::Closed {
                    reason: e.to_string(),
                },
                Err(e) => return Err(e),
            };

            match end {
                SessionEnd::Closed { reason } if self.config.auto_reconnect => {
                    warn!(reason = %reason, "Connection lost, reconnecting");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
                        _ = tokio::time::sleep(self.config.retry.initial_delay()) => {}
                    }
                }
                end => return Ok(end),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    fn quick_retry(max: Option<u32>) -> RetryConfig {
        RetryConfig {
            max_retries: max,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect_with_retry(&addr, &quick_retry(Some(2)), &CancellationToken::new()).await;
        assert!(matches!(result, Err(RuntimeError::GaveUp { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn shutdown_stops_retrying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let token = CancellationToken::new();
        token.cancel();
        let result = connect_with_retry(&addr, &quick_retry(None), &token).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn session_logs_in_rejoins_and_answers_ping() {
        let engine = Engine::builder("tmibot")
            .sender_config(tmibot_core::SenderConfig::unpaced(20, Duration::from_secs(30)))
            .build();
        engine.join_channel("lobby").unwrap();

        let (client, server) = tokio::io::duplex(4096);
        let session = Session::new(
            engine.clone(),
            vec!["PASS oauth:x".into(), "NICK tmibot".into()],
        );
        let run = tokio::spawn(async move { session.run(client).await });

        let (server_read, mut server_write) = tokio::io::split(server);
        let mut lines = BufReader::new(server_read).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PASS oauth:x");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "NICK tmibot");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "JOIN #lobby");

        server_write.write_all(b"PING :tmi.twitch.tv\r\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "PONG :tmi.twitch.tv"
        );

        server_write
            .write_all(b":tmi.twitch.tv NOTICE * :Login authentication failed\r\n")
            .await
            .unwrap();
        let end = run.await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::LoginFailed { .. }));
    }

    #[tokio::test]
    async fn session_reports_closed_stream() {
        let engine = Engine::builder("tmibot")
            .sender_config(tmibot_core::SenderConfig::unpaced(20, Duration::from_secs(30)))
            .build();
        let (client, server) = tokio::io::duplex(4096);
        drop(server);

        let end = Session::new(engine.clone(), Vec::new()).run(client).await;
        // Attaching may already fail on a dead peer; both count as a lost connection.
        match end {
            Ok(SessionEnd::Closed { .. }) | Err(RuntimeError::Transport(_)) => {}
            other => panic!("unexpected session end: {other:?}"),
        }
        assert!(!engine.transport().is_connected());
    }
}
