//! Integration tests for websocket channels
//!
//! Serves a dispatcher on a local port and talks to it with a real client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{body::Body, http::Request};
use futures::{SinkExt, StreamExt};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::prelude::*;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

type TestResult = std::result::Result<(), Box<dyn Error>>;

async fn start(dispatcher: Dispatcher) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = dispatcher.into_router();
    tokio::spawn(async move { axum::serve(listener, router).await });
    addr
}

fn echo_registry(closed: Arc<Mutex<Option<String>>>) -> Switchyard {
    let names = NamedInstances::default();
    names.register("prefix", "echo: ".to_string());
    let mut sy = Switchyard::builder()
        .worker_pool(WorkerPool::new(2).unwrap())
        .provider(names)
        .build()
        .unwrap();
    sy.websocket(
        "/echo/{room}",
        channel_with(["named:prefix"], move |session, args| {
            let prefix = args[0].as_str().unwrap_or_default().to_string();
            session.send(format!("joined {}", session.param("room").unwrap_or("?")))?;
            session.on_text(move |_, text| Ok(format!("{prefix}{text}")));
            session.on_binary(|_, data| Ok(data.len().to_string()));
            let closed = closed.clone();
            session.on_close(move |session, _| {
                *closed.lock().unwrap() = Some(session.path().to_string());
            });
            Ok(())
        }),
    )
    .unwrap();
    sy
}

#[tokio::test]
async fn test_channel_echo_and_close() -> TestResult {
    let closed = Arc::new(Mutex::new(None));
    let addr = start(echo_registry(closed.clone()).into_dispatcher()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/echo/lobby")).await?;

    let joined = socket.next().await.unwrap()?;
    assert_eq!(joined.to_text()?, "joined lobby");

    socket.send(Message::text("hi")).await?;
    let reply = socket.next().await.unwrap()?;
    assert_eq!(reply.to_text()?, "echo: hi");

    socket.send(Message::binary(vec![1u8, 2, 3])).await?;
    let reply = socket.next().await.unwrap()?;
    assert_eq!(reply.to_text()?, "3");

    socket.close(None).await?;
    for _ in 0..100 {
        if closed.lock().unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(closed.lock().unwrap().as_deref(), Some("/echo/lobby"));
    Ok(())
}

#[tokio::test]
async fn test_plain_request_to_channel_path_falls_through() -> TestResult {
    let app = echo_registry(Arc::new(Mutex::new(None)))
        .into_dispatcher()
        .into_router();
    let response = app
        .oneshot(Request::builder().uri("/echo/lobby").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_failing_channel_handler_closes_the_socket() -> TestResult {
    let mut sy = Switchyard::builder()
        .worker_pool(WorkerPool::new(1)?)
        .build()?;
    sy.websocket(
        "/refuse",
        channel(|_, _| Err(anyhow::anyhow!("room is closed"))),
    )?;
    let addr = start(sy.into_dispatcher()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/refuse")).await?;
    let next = tokio::time::timeout(Duration::from_secs(5), socket.next()).await?;
    match next {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("expected the socket to close, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_transport_error_reaches_on_error() -> TestResult {
    use tokio::io::AsyncWriteExt;
    use tokio_tungstenite::MaybeTlsStream;

    let errors = Arc::new(Mutex::new(Vec::<String>::new()));
    let closes = Arc::new(Mutex::new(0usize));
    let mut sy = Switchyard::builder()
        .worker_pool(WorkerPool::new(1)?)
        .build()?;
    {
        let errors = errors.clone();
        let closes = closes.clone();
        sy.websocket(
            "/fragile",
            channel(move |session, _| {
                let errors = errors.clone();
                session.on_error(move |_, message| {
                    errors.lock().unwrap().push(message.to_string());
                });
                let closes = closes.clone();
                session.on_close(move |_, _| *closes.lock().unwrap() += 1);
                Ok(())
            }),
        )?;
    }
    let addr = start(sy.into_dispatcher()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/fragile")).await?;
    // clients must mask their frames; an unmasked one is a protocol violation
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            stream.write_all(&[0x81, 0x02, b'h', b'i']).await?;
            stream.flush().await?;
        }
        _ => panic!("expected a plain TCP stream"),
    }

    for _ in 0..200 {
        if !errors.lock().unwrap().is_empty() && *closes.lock().unwrap() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(errors.lock().unwrap().len(), 1);
    // the session still closes exactly once after the error
    assert_eq!(*closes.lock().unwrap(), 1);
    Ok(())
}
