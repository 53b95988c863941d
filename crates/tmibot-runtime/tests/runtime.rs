/// End-to-end runtime tests against a fake chat server on localhost:
/// login, re-join, admin commands, farewell on stop, persistence on disk,
/// and login failure.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use tmibot_core::register_admin_commands;
use tmibot_runtime::config::TmibotConfig;
use tmibot_runtime::{BotRuntime, RuntimeError};

struct FakeServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("bot never connected")
            .unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn expect(&mut self, want: &str) {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
            .unwrap()
            .expect("connection closed");
        assert_eq!(line, want);
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }
}

fn config(port: u16, dir: &Path) -> TmibotConfig {
    let mut config = TmibotConfig::default();
    config.connection.host = "127.0.0.1".into();
    config.connection.port = port;
    config.connection.nickname = "tmibot".into();
    config.connection.token = "oauth:secret".into();
    config.connection.admin = Some("owner".into());
    config.connection.channels = vec!["lobby".into()];
    config.connection.capabilities = vec!["twitch.tv/tags".into()];
    config.connection.retry.initial_delay_ms = 10;
    config.connection.retry.max_delay_ms = 20;
    config.sender.pacing_min_ms = 0;
    config.sender.pacing_max_ms = 0;
    config.state.path = dir.join("state.json");
    config.state.roles_path = dir.join("roles.json");
    config.shutdown.farewell = Some("Bye!".into());
    config.console = false;
    config
}

#[tokio::test]
async fn runs_commands_and_says_farewell_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let runtime = Arc::new(
        BotRuntime::from_config(config(port, dir.path()), Arc::new(register_admin_commands))
            .unwrap(),
    );
    let run = tokio::spawn({
        let runtime = Arc::clone(&runtime);
        async move { runtime.run().await }
    });

    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS oauth:secret").await;
    server.expect("NICK tmibot").await;
    server.expect("CAP REQ :twitch.tv/tags").await;
    server.expect("JOIN #lobby").await;

    server.send(":tmibot!tmibot@tmibot.tmi.twitch.tv JOIN #lobby").await;
    server
        .send(":owner!owner@owner.tmi.twitch.tv PRIVMSG #lobby :!ping")
        .await;
    server.expect("PRIVMSG #lobby :Pong, I'm alive!").await;

    server
        .send(":owner!owner@owner.tmi.twitch.tv PRIVMSG #lobby :!addrole pinger alice")
        .await;
    // New channels start switched off, so the Command-kind reply is dropped.
    server
        .send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #lobby :!ping")
        .await;
    server.expect("PRIVMSG #lobby :Pong, I'm alive!").await;

    runtime.stop();
    server.expect("PRIVMSG #lobby :Bye!").await;
    run.await.unwrap().unwrap();

    let state = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert!(state.contains("\"lobby\""));
    let roles = std::fs::read_to_string(dir.path().join("roles.json")).unwrap();
    assert!(roles.contains("pinger"));
}

#[tokio::test]
async fn login_failure_ends_run_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = config(port, dir.path());
    config.shutdown.drain_timeout_secs = 1;
    let runtime = BotRuntime::from_config(config, Arc::new(register_admin_commands)).unwrap();
    let run = tokio::spawn(async move { runtime.run().await });

    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS oauth:secret").await;
    server
        .send(":tmi.twitch.tv NOTICE * :Login authentication failed")
        .await;

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run did not end")
        .unwrap();
    assert!(matches!(result, Err(RuntimeError::LoginFailed { .. })));
}

#[tokio::test]
async fn reconnects_and_rejoins_after_drop() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let runtime = Arc::new(
        BotRuntime::from_config(config(port, dir.path()), Arc::new(register_admin_commands))
            .unwrap(),
    );
    let run = tokio::spawn({
        let runtime = Arc::clone(&runtime);
        async move { runtime.run().await }
    });

    let mut first = FakeServer::accept(&listener).await;
    first.expect("PASS oauth:secret").await;
    drop(first);

    let mut second = FakeServer::accept(&listener).await;
    second.expect("PASS oauth:secret").await;
    second.expect("NICK tmibot").await;
    second.expect("CAP REQ :twitch.tv/tags").await;
    second.expect("JOIN #lobby").await;

    runtime.stop();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(6667, dir.path());
    config.connection.nickname.clear();

    let result = BotRuntime::from_config(config, Arc::new(register_admin_commands));
    assert!(matches!(result, Err(RuntimeError::Config(_))));
}
