//! HTTP client against a local server

use crate::support::items;
use crate::support::server::{collection_route, page_body, query_param, Reply, TestServer};
use mix_downloader::downloader::BudgetLimiter;
use mix_downloader::fetcher::http::{part_path, ApiHttpClient, StaticToken};
use mix_downloader::fetcher::retry::Retrying;
use mix_downloader::fetcher::{ContentClient, FetcherError, ItemDownloader, Paginator};
use mix_downloader::identifier::GroupRef;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn client(server: &TestServer) -> ApiHttpClient {
    ApiHttpClient::new(
        reqwest::Client::new(),
        server.base_url(),
        Arc::new(StaticToken::new("secret-token")),
        "NO",
    )
}

#[tokio::test]
async fn test_page_request_shape() {
    let server = TestServer::start(collection_route(5)).await;
    let client = client(&server).with_page_size(2);
    let group = GroupRef::parse("playlist:road-trip").unwrap();

    let page = client
        .fetch_page(&CancellationToken::new(), &group, 1)
        .await
        .unwrap();

    assert_eq!(page.declared_total, 5);
    assert_eq!(page.items.len(), 2);

    let target = &server.targets()[0];
    assert!(target.starts_with("/playlists/road-trip/items?"));
    assert_eq!(query_param(target, "offset").as_deref(), Some("2"));
    assert_eq!(query_param(target, "limit").as_deref(), Some("2"));
    assert_eq!(query_param(target, "countryCode").as_deref(), Some("NO"));

    let head = server.requests()[0].to_lowercase();
    assert!(head.contains("authorization: bearer secret-token"));
}

#[tokio::test]
async fn test_paginates_over_http() {
    let server = TestServer::start(collection_route(25)).await;
    let client = client(&server).with_page_size(10);
    let group = GroupRef::parse("mix:0123abcd").unwrap();

    let listing = Paginator::new(&client)
        .collect(&CancellationToken::new(), &group)
        .await
        .unwrap();

    assert_eq!(listing.items.len(), 25);
    assert_eq!(server.targets().len(), 3);
    assert_eq!(listing.items[24].id, "24");
}

#[tokio::test]
async fn test_unauthorized_is_authorization_expired() {
    let server = TestServer::start(|_: &str| Reply::status(401, "token expired")).await;
    let group = GroupRef::parse("album:1").unwrap();

    let result = client(&server)
        .fetch_page(&CancellationToken::new(), &group, 0)
        .await;

    assert!(matches!(result, Err(FetcherError::AuthorizationExpired)));
}

#[tokio::test]
async fn test_not_found_keeps_body() {
    let server = TestServer::start(|_: &str| Reply::status(404, "no such album")).await;
    let group = GroupRef::parse("album:1").unwrap();

    let result = client(&server)
        .fetch_page(&CancellationToken::new(), &group, 0)
        .await;

    match result {
        Err(FetcherError::ClientError(404, body)) => assert_eq!(body, "no such album"),
        other => panic!("expected 404 client error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_body_is_parse_error() {
    let server = TestServer::start(|_: &str| Reply::bytes(b"<html>maintenance</html>")).await;
    let group = GroupRef::parse("mix:1").unwrap();

    let result = client(&server)
        .fetch_page(&CancellationToken::new(), &group, 0)
        .await;

    assert!(matches!(result, Err(FetcherError::ParseError(_))));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ApiHttpClient::new(
        reqwest::Client::new(),
        format!("http://{addr}"),
        Arc::new(StaticToken::new("t")),
        "US",
    );
    let group = GroupRef::parse("mix:1").unwrap();

    let result = client
        .fetch_page(&CancellationToken::new(), &group, 0)
        .await;

    assert!(matches!(result, Err(FetcherError::NetworkError(_))));
}

#[tokio::test]
async fn test_download_streams_to_destination() {
    let server = TestServer::start(collection_route(1)).await;
    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("000-t0.flac");
    let item = &items(1)[0];

    client(&server)
        .download_item(&CancellationToken::new(), item, &destination)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"audio-t0");
    assert!(!part_path(&destination).exists());
    assert!(server.targets()[0].starts_with("/tracks/t0/stream?"));
}

#[tokio::test]
async fn test_failed_download_leaves_no_file() {
    let server = TestServer::start(|_: &str| Reply::status(500, "boom")).await;
    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("000-t0.flac");

    let result = client(&server)
        .download_item(&CancellationToken::new(), &items(1)[0], &destination)
        .await;

    assert!(matches!(result, Err(FetcherError::ServerError(500))));
    assert!(!destination.exists());
    assert!(!part_path(&destination).exists());
}

#[tokio::test]
async fn test_download_charges_budget() {
    let server = TestServer::start(collection_route(3)).await;
    let temp = TempDir::new().unwrap();
    let limiter = Arc::new(BudgetLimiter::new(
        10,
        Duration::from_secs(3600),
        Duration::ZERO,
    ));
    let client = client(&server).with_download_budget(limiter.clone());
    let cancel = CancellationToken::new();

    for item in items(3) {
        let destination = temp.path().join(format!("{}.flac", item.id));
        client.download_item(&cancel, &item, &destination).await.unwrap();
    }

    assert_eq!(limiter.used(), 3);

    // Listing is not budgeted
    let group = GroupRef::parse("mix:1").unwrap();
    client.fetch_page(&cancel, &group, 0).await.unwrap();
    assert_eq!(limiter.used(), 3);

    limiter.close().await;
}

#[tokio::test]
async fn test_retrying_recovers_from_server_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = TestServer::start(move |_: &str| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::status(503, "busy")
        } else {
            Reply::json(page_body(&["a".to_string()], 1))
        }
    })
    .await;
    let client = Retrying::new(client(&server)).with_max_retries(2);
    let group = GroupRef::parse("mix:1").unwrap();

    let page = client
        .fetch_page(&CancellationToken::new(), &group, 0)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retrying_gives_up_on_unauthorized() {
    let server = TestServer::start(|_: &str| Reply::status(401, "")).await;
    let client = Retrying::new(client(&server)).with_max_retries(3);
    let group = GroupRef::parse("mix:1").unwrap();

    let result = client
        .fetch_page(&CancellationToken::new(), &group, 0)
        .await;

    assert!(matches!(result, Err(FetcherError::AuthorizationExpired)));
    assert_eq!(server.requests().len(), 1);
}
