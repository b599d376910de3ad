//! Integration tests for the session controller.
//!
//! A mock HTTP/1.1 server writes chunked stream bodies step by step, so the
//! tests drive the full connect → parse → deliver → reconnect pipeline.

use futures::StreamExt;
use parking_lot::Mutex;
use push_stream::{EventKind, Notification, Session, SessionError, SessionState};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

// ---------------------------------------------------------------------------
// Mock stream server
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Step {
    /// Write one body chunk.
    Send(&'static str),
    /// Wait before the next step.
    Pause(Duration),
    /// Keep the connection open without sending anything else.
    Hold,
}

#[derive(Clone, Debug)]
enum Reply {
    /// 200 with a chunked body; the body ends after the last step unless it holds.
    Stream(Vec<Step>),
    /// A complete non-200 response.
    Status(u16, &'static str),
    /// Accept the request and never answer. Counts the client hanging up.
    Silent,
    /// Read the request and close the socket without a response.
    Hangup,
}

struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    /// Silent connections the client closed.
    abandoned: Arc<AtomicUsize>,
}

impl MockServer {
    fn uri(&self) -> String {
        format!("http://{}/stream", self.addr)
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Start a server answering successive connections with `replies`, in order.
/// Connections beyond the script get a silent, held-open stream.
async fn start_server(replies: Vec<Reply>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let replies = Arc::new(Mutex::new(VecDeque::from(replies)));
    let abandoned = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&requests);
    let hung_up = Arc::clone(&abandoned);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let reply = replies
                .lock()
                .pop_front()
                .unwrap_or(Reply::Stream(vec![Step::Hold]));
            let seen = Arc::clone(&seen);
            let hung_up = Arc::clone(&hung_up);
            tokio::spawn(serve(socket, reply, seen, hung_up));
        }
    });

    MockServer {
        addr,
        requests,
        abandoned,
    }
}

async fn serve(
    mut socket: TcpStream,
    reply: Reply,
    seen: Arc<Mutex<Vec<String>>>,
    hung_up: Arc<AtomicUsize>,
) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let request_line = String::from_utf8_lossy(&head)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    seen.lock().push(request_line);

    match reply {
        Reply::Status(status, body) => {
            let response = format!(
                "HTTP/1.1 {} Error\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Silent => {
            // Nothing more is expected from the client until it hangs up
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            hung_up.fetch_add(1, Ordering::SeqCst);
        }
        Reply::Hangup => drop(socket),
        Reply::Stream(steps) => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for step in steps {
                match step {
                    Step::Send(data) => {
                        let chunk = format!("{:x}\r\n{}\r\n", data.len(), data);
                        if socket.write_all(chunk.as_bytes()).await.is_err() {
                            return;
                        }
                        let _ = socket.flush().await;
                    }
                    Step::Pause(delay) => sleep(delay).await,
                    Step::Hold => std::future::pending::<()>().await,
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
            let _ = socket.shutdown().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Notification recorder
// ---------------------------------------------------------------------------

fn summarize(notification: &Notification) -> String {
    match notification {
        Notification::Event(event) => format!("event:{}", event.to_json()),
        Notification::Response(response) => format!("response:{}", response.status_code),
        Notification::Disconnect => "disconnect".to_string(),
        Notification::Reconnect => "reconnect".to_string(),
        Notification::ReconnectError(failure) => match failure.status_code {
            Some(status) => format!("reconnect-error:{}", status),
            None if failure.error.is_some() => "reconnect-error:transport".to_string(),
            None => "reconnect-error".to_string(),
        },
        Notification::Error(err) => format!("error:{}", err),
    }
}

/// Record every notification of `session`, in delivery order.
fn record(session: &Session) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in EventKind::ALL {
        let tx = tx.clone();
        session.on(kind, move |notification| {
            let _ = tx.send(summarize(notification));
            Ok(())
        });
    }
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

/// HTTP client that ignores proxy settings from the environment.
fn local_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("build http client")
}

fn session_for(server: &MockServer) -> Session {
    Session::builder(server.uri(), "secret")
        .http_client(local_client())
        .reconnect_delay(Duration::from_millis(50))
        .idle_timeout(Duration::from_secs(5))
        .build()
        .expect("build session")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_events_delivered_across_chunks() {
    let server = start_server(vec![Reply::Stream(vec![
        Step::Send("event: ping\n"),
        Step::Send("data: {\"a\":1}\n"),
        Step::Send("\n"),
        Step::Send("event: chat\r\ndata: {\"text\":\r\ndata: \"hi\"}\r"),
        Step::Pause(Duration::from_millis(20)),
        Step::Send("\n\r\n"),
        Step::Hold,
    ])])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    assert_ok!(session.connect().await);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(session.origin(), Some(format!("http://{}", server.addr)));

    assert_eq!(next(&mut rx).await, r#"event:{"a":1,"name":"ping"}"#);
    assert_eq!(next(&mut rx).await, r#"event:{"name":"chat","text":"hi"}"#);

    let requests = server.requests.lock().clone();
    assert_eq!(requests, vec!["GET /stream?access_token=secret HTTP/1.1"]);

    session.abort();
}

#[tokio::test]
async fn test_http_error_emits_response_and_fails() {
    let server = start_server(vec![Reply::Status(
        404,
        r#"{"error_description":"not found"}"#,
    )])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    let err = assert_err!(session.connect().await);
    let message = err.to_string();
    assert!(message.contains("404"), "{}", message);
    assert!(message.contains("not found"), "{}", message);
    assert_eq!(err.status_code(), Some(404));

    assert_eq!(next(&mut rx).await, "response:404");
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_non_json_error_body_kept_raw() {
    let server = start_server(vec![Reply::Status(500, "upstream exploded")]).await;
    let session = session_for(&server);

    let err = assert_err!(session.connect().await);
    assert_eq!(
        err.body(),
        Some(&Value::String("upstream exploded".to_string()))
    );
    assert_eq!(err.to_string(), "unexpected status 500");
}

#[tokio::test]
async fn test_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let uri = format!("http://{}/stream", addr);
    let session = Session::builder(uri.clone(), "secret")
        .http_client(local_client())
        .build()
        .expect("build session");

    let err = assert_err!(session.connect().await);
    assert!(matches!(err, SessionError::Network { .. }), "{:?}", err);
    assert!(err.to_string().contains(&uri));
    assert!(!err.to_string().contains("secret"));
}

#[tokio::test]
async fn test_reconnects_after_stream_end() {
    let server = start_server(vec![
        Reply::Stream(vec![Step::Send("event: first\ndata: {}\n\n")]),
        Reply::Stream(vec![Step::Send("event: second\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, r#"event:{"name":"first"}"#);
    assert_eq!(next(&mut rx).await, "disconnect");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, r#"event:{"name":"second"}"#);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(server.request_count(), 2);

    session.abort();
}

#[tokio::test]
async fn test_partial_record_discarded_on_reconnect() {
    let server = start_server(vec![
        Reply::Stream(vec![Step::Send("event: cut\ndata: {\"half\":")]),
        Reply::Stream(vec![Step::Send("true}\n\nevent: whole\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, "disconnect");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, r#"event:{"name":"whole"}"#);

    session.abort();
}

#[tokio::test]
async fn test_reconnect_error_then_retry() {
    let server = start_server(vec![
        Reply::Stream(vec![]),
        Reply::Status(503, r#"{"error_description":"maintenance"}"#),
        Reply::Stream(vec![Step::Send("event: back\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, "disconnect");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, "response:503");
    assert_eq!(next(&mut rx).await, "reconnect-error:503");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, r#"event:{"name":"back"}"#);

    session.abort();
}

#[tokio::test]
async fn test_transport_failure_on_reconnect() {
    let server = start_server(vec![
        Reply::Stream(vec![]),
        Reply::Hangup,
        Reply::Hangup,
        Reply::Stream(vec![Step::Send("event: back\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&payloads);
    session.on(EventKind::ReconnectError, move |notification| {
        if let Notification::ReconnectError(failure) = notification {
            captured.lock().push(serde_json::to_value(failure)?);
        }
        Ok(())
    });

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, "disconnect");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, "reconnect-error:transport");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, "reconnect-error:transport");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, r#"event:{"name":"back"}"#);
    assert_eq!(server.request_count(), 4);

    let payloads = payloads.lock();
    assert_eq!(payloads.len(), 2);
    for payload in payloads.iter() {
        assert!(payload["error"].is_string(), "{}", payload);
        assert!(payload["errorDescription"].is_string(), "{}", payload);
        assert!(payload.get("statusCode").is_none(), "{}", payload);
        assert!(payload.get("body").is_none(), "{}", payload);
    }
    drop(payloads);

    session.abort();
}

#[tokio::test]
async fn test_abort_prevents_reconnect() {
    let server = start_server(vec![Reply::Stream(vec![Step::Send(
        "event: only\ndata: {}\n\n",
    )])])
    .await;
    let session = Session::builder(server.uri(), "secret")
        .http_client(local_client())
        .reconnect_delay(Duration::from_millis(300))
        .build()
        .expect("build session");
    let mut rx = record(&session);

    assert_ok!(session.connect().await);
    assert_eq!(next(&mut rx).await, r#"event:{"name":"only"}"#);
    assert_eq!(next(&mut rx).await, "disconnect");
    assert_eq!(session.state(), SessionState::Disconnected);

    session.abort();
    session.abort();
    assert_eq!(session.state(), SessionState::Aborted);
    assert_eq!(session.listener_count(EventKind::Reconnect), 0);

    sleep(Duration::from_millis(600)).await;

    assert_eq!(server.request_count(), 1);
    assert_eq!(session.state(), SessionState::Aborted);
    // Listeners are detached, so the channel drains and closes
    assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await, Ok(None));
}

#[tokio::test]
async fn test_abort_while_connecting() {
    let server = start_server(vec![Reply::Silent]).await;
    // Default idle timeout: only cancellation can end the wait quickly
    let session = Session::builder(server.uri(), "secret")
        .http_client(local_client())
        .build()
        .expect("build session");

    let connecting = session.clone();
    let attempt = tokio::spawn(async move { connecting.connect().await });

    while server.request_count() == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Connecting);
    session.abort();

    let result = timeout(Duration::from_millis(500), attempt)
        .await
        .expect("connect still waiting after abort")
        .expect("connect task panicked");
    assert!(matches!(result, Err(SessionError::Aborted)), "{:?}", result);
    assert_eq!(session.state(), SessionState::Aborted);

    timeout(Duration::from_secs(2), async {
        while server.abandoned_count() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket left open after abort");
}

#[tokio::test]
async fn test_connect_again_cancels_pending_connect() {
    let server = start_server(vec![
        Reply::Silent,
        Reply::Stream(vec![Step::Send("event: second\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = Session::builder(server.uri(), "secret")
        .http_client(local_client())
        .build()
        .expect("build session");
    let mut rx = record(&session);

    let first = session.clone();
    let pending = tokio::spawn(async move { first.connect().await });
    while server.request_count() == 0 {
        sleep(Duration::from_millis(10)).await;
    }

    assert_ok!(session.connect().await);
    let result = timeout(Duration::from_millis(500), pending)
        .await
        .expect("replaced connect still waiting")
        .expect("connect task panicked");
    assert!(matches!(result, Err(SessionError::Aborted)), "{:?}", result);

    assert_eq!(next(&mut rx).await, r#"event:{"name":"second"}"#);
    assert_eq!(session.state(), SessionState::Streaming);

    timeout(Duration::from_secs(2), async {
        while server.abandoned_count() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replaced socket left open");

    session.abort();
}

#[tokio::test]
async fn test_idle_timeout_forces_reconnect() {
    let server = start_server(vec![
        Reply::Stream(vec![Step::Send("event: one\ndata: {}\n\n"), Step::Hold]),
        Reply::Stream(vec![Step::Send("event: two\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = Session::builder(server.uri(), "secret")
        .http_client(local_client())
        .reconnect_delay(Duration::from_millis(50))
        .idle_timeout(Duration::from_millis(200))
        .build()
        .expect("build session");
    let mut rx = record(&session);

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, r#"event:{"name":"one"}"#);
    assert_eq!(next(&mut rx).await, "disconnect");
    assert_eq!(next(&mut rx).await, "reconnect");
    assert_eq!(next(&mut rx).await, r#"event:{"name":"two"}"#);

    session.abort();
}

#[tokio::test]
async fn test_listener_error_does_not_stop_stream() {
    let server = start_server(vec![Reply::Stream(vec![
        Step::Send("event: bad\ndata: {}\n\n"),
        Step::Send("event: good\ndata: {}\n\n"),
        Step::Hold,
    ])])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);
    session.on(EventKind::Event, |notification| match notification {
        Notification::Event(event) if event.name == "bad" => Err("cannot handle bad".into()),
        _ => Ok(()),
    });

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, r#"event:{"name":"bad"}"#);
    let error = next(&mut rx).await;
    assert!(error.starts_with("error:"), "{}", error);
    assert!(error.contains("cannot handle bad"), "{}", error);
    assert_eq!(next(&mut rx).await, r#"event:{"name":"good"}"#);

    session.abort();
}

#[tokio::test]
async fn test_malformed_and_unnamed_records_dropped_silently() {
    let server = start_server(vec![Reply::Stream(vec![
        Step::Send("event: broken\ndata: {oops\n\n"),
        Step::Send("data: {\"unnamed\":true}\n\n"),
        Step::Send(": keep-alive\n\n"),
        Step::Send("event: fine\ndata: {\"ok\":true}\n\n"),
        Step::Hold,
    ])])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    assert_ok!(session.connect().await);

    assert_eq!(next(&mut rx).await, r#"event:{"name":"fine","ok":true}"#);
    session.abort();
}

#[tokio::test]
async fn test_event_stream_ends_on_abort() {
    let server = start_server(vec![Reply::Stream(vec![
        Step::Send("event: a\ndata: {\"n\":1}\n\nevent: b\ndata: {\"n\":2}\n\n"),
        Step::Hold,
    ])])
    .await;
    let session = session_for(&server);
    let mut events = session.events();

    assert_ok!(session.connect().await);

    let first = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out")
        .expect("stream ended early");
    assert_eq!(first.name, "a");
    assert_eq!(first.data, json!({"n": 1}));

    let second = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out")
        .expect("stream ended early");
    assert_eq!(second.to_json(), json!({"n": 2, "name": "b"}));

    session.abort();
    let end = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out");
    assert!(end.is_none());
}

#[tokio::test]
async fn test_connect_again_replaces_stream() {
    let server = start_server(vec![
        Reply::Stream(vec![Step::Hold]),
        Reply::Stream(vec![Step::Send("event: fresh\ndata: {}\n\n"), Step::Hold]),
    ])
    .await;
    let session = session_for(&server);
    let mut rx = record(&session);

    assert_ok!(session.connect().await);
    assert_ok!(session.connect().await);

    // The replaced stream never reports a disconnect
    assert_eq!(next(&mut rx).await, r#"event:{"name":"fresh"}"#);
    assert_eq!(server.request_count(), 2);

    session.abort();
}
