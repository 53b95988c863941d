/// Integration tests for the outbound sender: the sliding send window and
/// the per-channel send predicate, observed from the far end of the wire.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tmibot_core::{
    Engine, MessageKind, OutboundMessage, SendPolicy, Sender, SenderConfig, Transport,
};

#[tokio::test(start_paused = true)]
async fn window_limits_sends_per_period() {
    let transport = Transport::new();
    let (client, server) = tokio::io::duplex(64 * 1024);
    transport.attach(client, &[]).await.unwrap();
    let mut lines = BufReader::new(server).lines();

    let (handle, _task) = Sender::spawn(
        SenderConfig::unpaced(20, Duration::from_secs(30)),
        Arc::new(tmibot_core::AllowAll),
        transport,
        CancellationToken::new(),
    );

    let start = Instant::now();
    for i in 0..25 {
        handle
            .enqueue(OutboundMessage::new(format!("msg {i}"), MessageKind::Chat, "lobby"))
            .unwrap();
    }

    for i in 0..25 {
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, format!("PRIVMSG #lobby :msg {i}"));
        let elapsed = start.elapsed();
        if i < 20 {
            assert!(elapsed < Duration::from_secs(1), "msg {i} late: {elapsed:?}");
        } else {
            assert!(elapsed >= Duration::from_secs(30), "msg {i} early: {elapsed:?}");
        }
    }
    assert!(handle.wait_idle(Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn denied_messages_never_reach_the_wire() {
    let transport = Transport::new();
    let (client, server) = tokio::io::duplex(64 * 1024);
    transport.attach(client, &[]).await.unwrap();

    let quiet_channel = |m: &OutboundMessage| m.channel != "quiet";
    let policy: Arc<dyn SendPolicy> = Arc::new(quiet_channel);
    let (handle, _task) = Sender::spawn(
        SenderConfig::unpaced(20, Duration::from_secs(30)),
        policy,
        transport.clone(),
        CancellationToken::new(),
    );

    handle
        .enqueue(OutboundMessage::new("one", MessageKind::Chat, "quiet"))
        .unwrap();
    handle
        .enqueue(OutboundMessage::new("two", MessageKind::Chat, "lobby"))
        .unwrap();
    handle.enqueue_raw("JOIN #quiet").unwrap();
    assert!(handle.wait_idle(Duration::from_secs(5)).await);

    transport.detach().await;
    let mut lines = BufReader::new(server).lines();
    let mut seen = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        seen.push(line);
    }
    assert_eq!(seen, vec!["PRIVMSG #lobby :two", "JOIN #quiet"]);
}

#[tokio::test(start_paused = true)]
async fn write_failure_requeues_until_reconnect() {
    let engine = Engine::builder("tmibot")
        .sender_config(SenderConfig::unpaced(20, Duration::from_secs(30)))
        .build();

    // A reader dropped before the write makes the write fail.
    let (client, server) = tokio::io::duplex(1024);
    engine.transport().attach(client, &[]).await.unwrap();
    drop(server);

    engine.send_raw("JOIN #lobby").unwrap();
    assert!(!engine.sender().wait_idle(Duration::from_secs(1)).await);
    assert!(!engine.transport().is_connected());
    assert_eq!(engine.sender().pending(), 1);

    let (client, server) = tokio::io::duplex(1024);
    engine.transport().attach(client, &[]).await.unwrap();
    let mut lines = BufReader::new(server).lines();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "JOIN #lobby");
    assert!(engine.sender().wait_idle(Duration::from_secs(1)).await);

    engine.close().await;
}
