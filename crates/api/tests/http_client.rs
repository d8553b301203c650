use std::time::Duration;

use loupe_api::{HttpSearchClient, LoupeError, SearchClient};
use loupe_core::NavigatorConfig;
use loupe_search::{build_request, FilterState, SearchRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answer exactly one request with a canned response; returns the base url.
async fn serve_once(status_line: &'static str, body: &'static str, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16 * 1024];
        let _ = sock.read(&mut buf).await;
        tokio::time::sleep(delay).await;
        let resp = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let _ = sock.write_all(resp.as_bytes()).await;
        let _ = sock.shutdown().await;
    });
    format!("http://{}/ws", addr)
}

fn client(base_url: String, timeout: Duration) -> (HttpSearchClient, SearchRequest) {
    let cfg = NavigatorConfig { base_url, request_timeout: timeout, ..NavigatorConfig::default() };
    let state = FilterState::with_scope(Some(cfg.resolve_scope("co123").unwrap()));
    (HttpSearchClient::new(&cfg).unwrap(), build_request(&state, &cfg))
}

#[tokio::test]
async fn ok_response_is_decoded() {
    let body = r#"{"totalRecords":1,"facetResults":[{"fieldName":"kingdom","fieldResult":[{"label":"Animalia","count":1,"fq":"kingdom:\"Animalia\""}]}],"occurrences":[{"uuid":"u1","scientificName":"Felis catus","imageMetadata":[{"imageId":"i1","thumbWidth":10,"thumbHeight":10,"thumbUrl":"https://img/i1"}]}]}"#;
    let base = serve_once("200 OK", body, Duration::ZERO).await;
    let (c, req) = client(base, Duration::from_secs(5));
    let resp = c.search(&req).await.unwrap();
    assert_eq!(resp.total_records, 1);
    assert_eq!(resp.facet("kingdom").unwrap().values[0].label, "Animalia");
    assert_eq!(resp.records[0].images[0].image_id, "i1");
}

#[tokio::test]
async fn not_found_maps_to_not_found() {
    let base = serve_once("404 Not Found", "", Duration::ZERO).await;
    let (c, req) = client(base, Duration::from_secs(5));
    assert!(matches!(c.search(&req).await, Err(LoupeError::NotFound(_))));
}

#[tokio::test]
async fn server_error_maps_to_transport() {
    let base = serve_once("500 Internal Server Error", "{}", Duration::ZERO).await;
    let (c, req) = client(base, Duration::from_secs(5));
    assert!(matches!(c.search(&req).await, Err(LoupeError::Transport(_))));
}

#[tokio::test]
async fn malformed_body_maps_to_transport() {
    let base = serve_once("200 OK", "<html>oops</html>", Duration::ZERO).await;
    let (c, req) = client(base, Duration::from_secs(5));
    match c.search(&req).await {
        Err(LoupeError::Transport(msg)) => assert!(msg.contains("malformed")),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn slow_server_maps_to_timeout() {
    let base = serve_once("200 OK", "{}", Duration::from_secs(5)).await;
    let (c, req) = client(base, Duration::from_millis(200));
    assert!(matches!(c.search(&req).await, Err(LoupeError::Timeout(_))));
}

#[tokio::test]
async fn refused_connection_maps_to_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (c, req) = client(format!("http://{}/ws", addr), Duration::from_secs(5));
    assert!(matches!(c.search(&req).await, Err(LoupeError::Transport(_))));
}
