use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;
use twitch_realtime::protocol::{OutboundFrame, RequestData};
use twitch_realtime::{
    ConnectionState, Error, Event, Notification, Realtime, RealtimeConfig, TimingConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type BoxError = Box<dyn std::error::Error + Send + Sync>;

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// A stand-in for the PubSub edge that accepts one connection at a time.
struct MockEdge {
    listener: TcpListener,
    port: u16,
}

impl MockEdge {
    async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    async fn accept(&self) -> Result<WsStream, BoxError> {
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .map_err(|_| "timed out waiting for the client to connect")??;
        Ok(tokio_tungstenite::accept_async(tcp).await?)
    }

    /// Accept a connection and acknowledge its bootstrap LISTEN.
    /// Returns the socket and the topics the client replayed.
    async fn accept_bootstrap(&self) -> Result<(WsStream, Vec<String>), BoxError> {
        let mut ws = self.accept().await?;
        let (nonce, data) = expect_listen(&mut ws).await?;
        respond(&mut ws, &nonce, "").await?;
        Ok((ws, data.topics))
    }
}

async fn read_frame(ws: &mut WsStream) -> Result<OutboundFrame, BoxError> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .map_err(|_| "timed out waiting for a client frame")?
            .ok_or("WebSocket closed unexpectedly")??;
        if let tungstenite::Message::Text(text) = frame {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

async fn expect_listen(ws: &mut WsStream) -> Result<(String, RequestData), BoxError> {
    match read_frame(ws).await? {
        OutboundFrame::Listen { nonce, data } => Ok((nonce, data)),
        other => Err(format!("expected LISTEN, got {other:?}").into()),
    }
}

async fn expect_unlisten(ws: &mut WsStream) -> Result<(String, RequestData), BoxError> {
    match read_frame(ws).await? {
        OutboundFrame::Unlisten { nonce, data } => Ok((nonce, data)),
        other => Err(format!("expected UNLISTEN, got {other:?}").into()),
    }
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) -> Result<(), BoxError> {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await?;
    Ok(())
}

async fn respond(ws: &mut WsStream, nonce: &str, error: &str) -> Result<(), BoxError> {
    send_json(ws, json!({"type": "RESPONSE", "nonce": nonce, "error": error})).await
}

/// Wait for the first event matching `pred`, skipping everything else.
async fn wait_for(
    rt: &mut Realtime,
    pred: impl Fn(&Event) -> bool,
) -> Result<Event, BoxError> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rt.next().await {
            if pred(&event) {
                return Ok(event);
            }
        }
        Err::<Event, BoxError>("event stream ended".into())
    })
    .await
    .map_err(|_| "timed out waiting for event")?
}

fn fast_timing() -> TimingConfig {
    TimingConfig {
        request_timeout: Duration::from_secs(2),
        ping_interval: Duration::from_secs(60),
        pong_timeout: Duration::from_secs(60),
        reconnect_grace: Duration::from_millis(50),
        backoff_step: Duration::from_millis(50),
        event_channel_capacity: 256,
    }
}

fn test_config(edge: &MockEdge, topics: &[&str]) -> RealtimeConfig {
    let mut config = RealtimeConfig::new(topics.iter().copied());
    config.url = Some(edge.url());
    config.timing = Some(fast_timing());
    config
}

fn is_connect(event: &Event) -> bool {
    matches!(event, Event::Connect)
}

fn is_warn(event: &Event) -> bool {
    matches!(event, Event::Warn(_))
}

// ---------------------------------------------------------------------------
// Connect + bootstrap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bootstrap_listen_and_notification() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.monstercat"])).unwrap();

    let mut conn = edge.accept().await.unwrap();
    let (nonce, data) = expect_listen(&mut conn).await.unwrap();
    assert_eq!(data.topics, vec!["video-playback.monstercat"]);
    assert!(data.auth_token.is_none());
    respond(&mut conn, &nonce, "").await.unwrap();

    wait_for(&mut rt, is_connect).await.unwrap();
    assert_eq!(rt.state(), ConnectionState::Open);

    let message = json!({"type": "viewcount", "viewers": 42, "server_time": 1.5}).to_string();
    send_json(
        &mut conn,
        json!({
            "type": "MESSAGE",
            "data": {"topic": "video-playback.monstercat", "message": message}
        }),
    )
    .await
    .unwrap();

    // Every inbound frame is surfaced raw before routing.
    wait_for(&mut rt, |e| {
        matches!(e, Event::Raw(v) if v.get("type").and_then(|t| t.as_str()) == Some("MESSAGE"))
    })
    .await
    .unwrap();

    match wait_for(&mut rt, |e| matches!(e, Event::Notification(_)))
        .await
        .unwrap()
    {
        Event::Notification(Notification::ViewCount(v)) => {
            assert_eq!(v.channel, "monstercat");
            assert_eq!(v.viewers, 42);
        }
        other => panic!("expected viewcount, got {other:?}"),
    }
}

#[tokio::test]
async fn bootstrap_carries_default_token() {
    let edge = MockEdge::start().await.unwrap();
    let mut config = test_config(&edge, &["whispers.1"]);
    config.auth_token = Some("secret".into());
    let mut rt = Realtime::new(config).unwrap();

    let mut conn = edge.accept().await.unwrap();
    let (nonce, data) = expect_listen(&mut conn).await.unwrap();
    assert_eq!(data.auth_token.as_deref(), Some("secret"));
    respond(&mut conn, &nonce, "ERR_BADAUTH").await.unwrap();

    match wait_for(&mut rt, |e| matches!(e, Event::Error { .. }))
        .await
        .unwrap()
    {
        Event::Error { context, detail } => {
            assert_eq!(context, "Error while subscribing to initial topics");
            assert_eq!(detail, "ERR_BADAUTH");
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listen_resolves_after_ack() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    let (result, server) = tokio::join!(rt.listen("video-playback.b", None), async {
        let (nonce, data) = expect_listen(&mut conn).await?;
        // Not committed until acknowledged.
        assert_eq!(rt.topic_count(), 1);
        respond(&mut conn, &nonce, "").await?;
        Ok::<_, BoxError>(data)
    });
    result.unwrap();
    assert_eq!(server.unwrap().topics, vec!["video-playback.b"]);
    assert_eq!(rt.topics(), vec!["video-playback.a", "video-playback.b"]);
    assert!(rt.accepts_new_topics());
}

#[tokio::test]
async fn listen_with_explicit_token_reaches_the_wire() {
    let edge = MockEdge::start().await.unwrap();
    let mut config = test_config(&edge, &["video-playback.a"]);
    config.auth_token = Some("default".into());
    let mut rt = Realtime::new(config).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    let (result, server) = tokio::join!(rt.listen(["whispers.1"], Some("explicit")), async {
        let (nonce, data) = expect_listen(&mut conn).await?;
        respond(&mut conn, &nonce, "").await?;
        Ok::<_, BoxError>(data)
    });
    result.unwrap();
    assert_eq!(server.unwrap().auth_token.as_deref(), Some("explicit"));
}

#[tokio::test]
async fn listen_rejected_by_server() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    let (result, server) = tokio::join!(rt.listen("video-playback.b", None), async {
        let (nonce, _) = expect_listen(&mut conn).await?;
        respond(&mut conn, &nonce, "ERR_BADTOPIC").await?;
        Ok::<_, BoxError>(())
    });
    server.unwrap();
    match result {
        Err(Error::Remote(detail)) => assert_eq!(detail, "ERR_BADTOPIC"),
        other => panic!("expected Remote error, got {other:?}"),
    }
    assert_eq!(rt.topics(), vec!["video-playback.a"]);
}

#[tokio::test]
async fn privileged_listen_without_token_sends_nothing() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    match rt.listen("channel-bitsevents.9", None).await {
        Err(Error::Unauthorized { topic }) => assert_eq!(topic, "channel-bitsevents.9"),
        other => panic!("expected Unauthorized, got {other:?}"),
    }

    // The next frame on the wire belongs to the following request.
    let (result, server) = tokio::join!(rt.listen("video-playback.b", None), async {
        let (nonce, data) = expect_listen(&mut conn).await?;
        respond(&mut conn, &nonce, "").await?;
        Ok::<_, BoxError>(data)
    });
    result.unwrap();
    assert_eq!(server.unwrap().topics, vec!["video-playback.b"]);
}

#[tokio::test]
async fn listen_times_out_without_response() {
    let edge = MockEdge::start().await.unwrap();
    let mut config = test_config(&edge, &["video-playback.a"]);
    config.timing = Some(TimingConfig {
        request_timeout: Duration::from_millis(200),
        ..fast_timing()
    });
    let mut rt = Realtime::new(config).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    let (result, server) = tokio::join!(rt.listen("video-playback.b", None), async {
        let (nonce, _) = expect_listen(&mut conn).await?;
        Ok::<_, BoxError>(nonce)
    });
    assert!(matches!(result, Err(Error::Timeout)));

    // A late response finds no pending request.
    respond(&mut conn, &server.unwrap(), "").await.unwrap();
    match wait_for(&mut rt, is_warn).await.unwrap() {
        Event::Warn(w) => assert_eq!(w, "Received message for unknown nonce."),
        other => panic!("expected Warn, got {other:?}"),
    }
    assert_eq!(rt.topics(), vec!["video-playback.a"]);
}

#[tokio::test]
async fn concurrent_listens_settle_independently() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    let (first, second, server) = tokio::join!(
        rt.listen("video-playback.b", None),
        rt.listen("video-playback.c", None),
        async {
            let (n1, d1) = expect_listen(&mut conn).await?;
            let (n2, d2) = expect_listen(&mut conn).await?;
            // Answer out of order; reject whichever asked for `c`.
            for (nonce, data) in [(n2, d2), (n1, d1)] {
                let error = if data.topics == ["video-playback.c"] {
                    "ERR_BADTOPIC"
                } else {
                    ""
                };
                respond(&mut conn, &nonce, error).await?;
            }
            Ok::<_, BoxError>(())
        }
    );
    server.unwrap();
    first.unwrap();
    assert!(matches!(second, Err(Error::Remote(_))));
    assert_eq!(rt.topics(), vec!["video-playback.a", "video-playback.b"]);
}

#[tokio::test]
async fn unlisten_removes_topic_after_ack() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt =
        Realtime::new(test_config(&edge, &["video-playback.a", "video-playback.b"])).unwrap();
    let (mut conn, topics) = edge.accept_bootstrap().await.unwrap();
    assert_eq!(topics, vec!["video-playback.a", "video-playback.b"]);
    wait_for(&mut rt, is_connect).await.unwrap();

    let (result, server) = tokio::join!(rt.unlisten("video-playback.b", None), async {
        let (nonce, data) = expect_unlisten(&mut conn).await?;
        respond(&mut conn, &nonce, "").await?;
        Ok::<_, BoxError>(data)
    });
    result.unwrap();
    assert_eq!(server.unwrap().topics, vec!["video-playback.b"]);
    assert_eq!(rt.topics(), vec!["video-playback.a"]);
}

// ---------------------------------------------------------------------------
// Router edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_frames_are_non_fatal() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    send_json(&mut conn, json!({"type": "SOMETHING_NEW"}))
        .await
        .unwrap();
    match wait_for(&mut rt, is_warn).await.unwrap() {
        Event::Warn(w) => assert!(w.starts_with("Received unknown message type")),
        other => panic!("expected Warn, got {other:?}"),
    }

    conn.send(tungstenite::Message::Text("not json".into()))
        .await
        .unwrap();
    match wait_for(&mut rt, is_warn).await.unwrap() {
        Event::Warn(w) => assert_eq!(w, "Failed to parse websocket message"),
        other => panic!("expected Warn, got {other:?}"),
    }
    assert_eq!(rt.state(), ConnectionState::Open);
}

// ---------------------------------------------------------------------------
// Reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    let (result, server) = tokio::join!(rt.listen("video-playback.b", None), async {
        let (nonce, _) = expect_listen(&mut conn).await?;
        respond(&mut conn, &nonce, "").await?;
        Ok::<_, BoxError>(())
    });
    result.unwrap();
    server.unwrap();

    drop(conn);
    match wait_for(&mut rt, |e| matches!(e, Event::Close { .. }))
        .await
        .unwrap()
    {
        Event::Close { will_reconnect } => assert!(will_reconnect),
        other => panic!("expected Close, got {other:?}"),
    }

    let (_conn, replayed) = edge.accept_bootstrap().await.unwrap();
    assert_eq!(replayed, vec!["video-playback.a", "video-playback.b"]);
    wait_for(&mut rt, is_connect).await.unwrap();
    assert_eq!(rt.state(), ConnectionState::Open);
}

#[tokio::test]
async fn server_reconnect_frame_forces_new_connection() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    send_json(&mut conn, json!({"type": "RECONNECT"}))
        .await
        .unwrap();
    match wait_for(&mut rt, |e| matches!(e, Event::Close { .. }))
        .await
        .unwrap()
    {
        Event::Close { will_reconnect } => assert!(will_reconnect),
        other => panic!("expected Close, got {other:?}"),
    }

    let (_conn, replayed) = edge.accept_bootstrap().await.unwrap();
    assert_eq!(replayed, vec!["video-playback.a"]);
    wait_for(&mut rt, is_connect).await.unwrap();
}

#[tokio::test]
async fn missed_pong_forces_reconnect() {
    let edge = MockEdge::start().await.unwrap();
    let mut config = test_config(&edge, &["video-playback.a"]);
    config.timing = Some(TimingConfig {
        ping_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(100),
        ..fast_timing()
    });
    let mut rt = Realtime::new(config).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    // See the PING, never answer it.
    assert_eq!(read_frame(&mut conn).await.unwrap(), OutboundFrame::Ping);

    match wait_for(&mut rt, |e| matches!(e, Event::Close { .. }))
        .await
        .unwrap()
    {
        Event::Close { will_reconnect } => assert!(will_reconnect),
        other => panic!("expected Close, got {other:?}"),
    }
    let (_conn, replayed) = edge.accept_bootstrap().await.unwrap();
    assert_eq!(replayed, vec!["video-playback.a"]);
    wait_for(&mut rt, is_connect).await.unwrap();
}

#[tokio::test]
async fn answered_pings_keep_connection_open() {
    let edge = MockEdge::start().await.unwrap();
    let mut config = test_config(&edge, &["video-playback.a"]);
    config.timing = Some(TimingConfig {
        ping_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(200),
        ..fast_timing()
    });
    let mut rt = Realtime::new(config).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    for _ in 0..3 {
        assert_eq!(read_frame(&mut conn).await.unwrap(), OutboundFrame::Ping);
        send_json(&mut conn, json!({"type": "PONG"})).await.unwrap();
    }
    assert_eq!(rt.state(), ConnectionState::Open);
}

#[tokio::test]
async fn no_reconnect_when_disabled() {
    let edge = MockEdge::start().await.unwrap();
    let mut config = test_config(&edge, &["video-playback.a"]);
    config.reconnect = false;
    let mut rt = Realtime::new(config).unwrap();
    let (conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    drop(conn);
    match wait_for(&mut rt, |e| matches!(e, Event::Close { .. }))
        .await
        .unwrap()
    {
        Event::Close { will_reconnect } => assert!(!will_reconnect),
        other => panic!("expected Close, got {other:?}"),
    }
    assert_eq!(rt.state(), ConnectionState::Closed { reconnecting: false });

    let accepted =
        tokio::time::timeout(Duration::from_millis(300), edge.listener.accept()).await;
    assert!(accepted.is_err(), "client must not reconnect");
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_sends_close_frame() {
    let edge = MockEdge::start().await.unwrap();
    let mut rt = Realtime::new(test_config(&edge, &["video-playback.a"])).unwrap();
    let (mut conn, _) = edge.accept_bootstrap().await.unwrap();
    wait_for(&mut rt, is_connect).await.unwrap();

    rt.close();

    let close = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match conn.next().await {
                Some(Ok(tungstenite::Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return false,
            }
        }
    })
    .await
    .unwrap();
    assert!(close, "server should see a close frame");
}
