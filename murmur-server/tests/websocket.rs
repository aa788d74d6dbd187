mod common;

use common::{channel_provider, text, ChannelProvider};
use futures_util::{SinkExt, StreamExt};
use murmur_server::{router, ProviderEvent, StreamingRelay};
use murmur_shared::{ErrorKind, StreamEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(provider: Arc<ChannelProvider>) -> Socket {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(StreamingRelay::new(provider));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (socket, _) = connect_async(format!("ws://{addr}/ws/chat")).await.unwrap();
    socket
}

async fn send_chat(socket: &mut Socket) {
    let frame = json!({
        "type": "chat",
        "messages": [{"role": "user", "content": [{"type": "text", "text": "Tell me a story"}]}]
    });
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn send_cancel(socket: &mut Socket) {
    let frame = json!({"type": "cancel"});
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next event frame, skipping control frames.
async fn next_event(socket: &mut Socket) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended early: {:?}", other),
            }
        }
    })
    .await
    .expect("event frame within a second")
}

#[tokio::test]
async fn events_arrive_as_frames() {
    let (provider, upstream) = channel_provider();
    let mut socket = serve(provider).await;

    send_chat(&mut socket).await;
    upstream.send(text("Once ")).unwrap();
    assert_eq!(next_event(&mut socket).await, StreamEvent::text("Once "));
    upstream.send(text("upon a time.")).unwrap();
    upstream.send(Ok(ProviderEvent::Finished)).unwrap();
    assert_eq!(next_event(&mut socket).await, StreamEvent::text("upon a time."));
    assert_eq!(next_event(&mut socket).await, StreamEvent::Done);
}

#[tokio::test]
async fn cancel_ends_with_a_single_cancelled_error() {
    let (provider, upstream) = channel_provider();
    let mut socket = serve(provider).await;

    send_chat(&mut socket).await;
    upstream.send(text("Once ")).unwrap();
    assert_eq!(next_event(&mut socket).await, StreamEvent::text("Once "));

    send_cancel(&mut socket).await;
    let event = next_event(&mut socket).await;
    assert_eq!(event.error_kind(), Some(ErrorKind::Cancelled));

    tokio::time::timeout(Duration::from_secs(1), upstream.closed())
        .await
        .expect("provider stream released after cancel");

    // Late upstream output must not reach the socket.
    let _ = upstream.send(text("never"));
    let extra = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(extra.is_err(), "unexpected frame after cancel: {:?}", extra);
}

#[tokio::test]
async fn second_chat_while_busy_is_refused() {
    let (provider, upstream) = channel_provider();
    let mut socket = serve(provider.clone()).await;

    send_chat(&mut socket).await;
    upstream.send(text("A")).unwrap();
    assert_eq!(next_event(&mut socket).await, StreamEvent::text("A"));

    send_chat(&mut socket).await;
    assert!(matches!(
        next_event(&mut socket).await,
        StreamEvent::Error {
            kind: ErrorKind::InvalidRequest,
            started: false,
            ..
        }
    ));

    // The running relay is untouched.
    upstream.send(text("B")).unwrap();
    upstream.send(Ok(ProviderEvent::Finished)).unwrap();
    assert_eq!(next_event(&mut socket).await, StreamEvent::text("B"));
    assert_eq!(next_event(&mut socket).await, StreamEvent::Done);
    assert_eq!(provider.starts(), 1);
}

#[tokio::test]
async fn closing_the_socket_releases_the_provider() {
    let (provider, upstream) = channel_provider();
    let mut socket = serve(provider).await;

    send_chat(&mut socket).await;
    upstream.send(text("Once ")).unwrap();
    assert_eq!(next_event(&mut socket).await, StreamEvent::text("Once "));

    socket.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), upstream.closed())
        .await
        .expect("provider stream released after close");
}
