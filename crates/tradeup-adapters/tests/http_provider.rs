use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tradeup_adapters::{
    BackoffPolicy, HttpProviderConfig, HttpTaskProvider, ProviderError, TaskProvider, TaskRequest,
};
use tradeup_core::{Payload, TaskKind};

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Serve exactly one canned response and hand back the raw request text.
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.expect("write");
        stream.shutdown().await.ok();
        request
    });
    (format!("http://{addr}"), handle)
}

fn provider(base_url: String, timeout: Duration) -> HttpTaskProvider {
    HttpTaskProvider::new(HttpProviderConfig {
        name: "taskrunner".into(),
        base_url,
        api_token: Some("secret-token".into()),
        timeout,
        user_agent: None,
        backoff: BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        },
    })
    .expect("provider")
}

fn request() -> TaskRequest {
    let mut metadata = Payload::new();
    metadata.insert("address".into(), "12 Elm St".into());
    TaskRequest {
        kind: TaskKind::Inspect,
        assignee: Some("runner-3".into()),
        metadata,
    }
}

#[tokio::test]
async fn created_task_id_is_returned_with_provider_name() {
    let (url, server) = serve_once("201 Created", r#"{"id":"ext-991"}"#).await;
    let ticket = provider(url, Duration::from_secs(5))
        .create_task(&request())
        .await
        .expect("ticket");

    assert_eq!(ticket.provider, "taskrunner");
    assert_eq!(ticket.provider_task_id, "ext-991");

    let raw = server.await.expect("server");
    assert!(raw.starts_with("POST /tasks"));
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret-token"));
    assert!(raw.to_ascii_lowercase().contains("idempotency-key:"));
    assert!(raw.contains(r#""type":"inspect""#));
}

#[tokio::test]
async fn client_error_is_reported_as_rejection() {
    let (url, server) = serve_once("422 Unprocessable Entity", r#"{"error":"bad address"}"#).await;
    let err = provider(url, Duration::from_secs(5))
        .create_task(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Rejected { status: 422, .. }));
    server.await.expect("server");
}

#[tokio::test]
async fn silent_provider_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let err = provider(format!("http://{addr}"), Duration::from_millis(200))
        .create_task(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(_)));
    server.abort();
}
