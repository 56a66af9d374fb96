use serde_json::json;
use std::io::Write;
use std::time::Duration;
use visualsnoop_core::{
    CollectionClient, CollectionOptions, Credentials, Error, ImageSource, Timeout,
};
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_handshake(server: &MockServer, prefix: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("{prefix}/collection")))
        .and(query_param("session", "init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn connect_to(server: &MockServer) -> visualsnoop_core::Result<CollectionClient> {
    CollectionClient::connect(
        Credentials::new("pub-key", "secret-key"),
        CollectionOptions::default()
            .with_endpoint(server.uri())
            .with_max_retries(0),
    )
    .await
}

async fn connected(server: &MockServer) -> CollectionClient {
    mount_handshake(
        server,
        "",
        json!({"collection_id": "abc123", "collection_name": "Pets"}),
    )
    .await;
    connect_to(server).await.unwrap()
}

fn resolution_message(result: visualsnoop_core::Result<CollectionClient>) -> String {
    match result {
        Err(Error::CollectionResolution(msg)) => msg,
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("handshake should have failed"),
    }
}

#[tokio::test]
async fn handshake_populates_collection_identity() {
    let server = MockServer::start().await;
    let client = connected(&server).await;

    assert_eq!(client.id(), "abc123");
    assert_eq!(client.name(), "Pets");
    assert_eq!(client.user(), "");
    assert_eq!(client.endpoint(), server.uri());
}

#[tokio::test]
async fn handshake_with_empty_object_fails() {
    let server = MockServer::start().await;
    mount_handshake(&server, "", json!({})).await;

    let msg = resolution_message(connect_to(&server).await);
    assert_eq!(msg, "Unable to get Collection ID");
}

#[tokio::test]
async fn handshake_reports_server_message() {
    let server = MockServer::start().await;
    mount_handshake(&server, "", json!({"message": "bad key"})).await;

    let result = connect_to(&server).await;
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "bad key");
    assert!(matches!(err, Error::CollectionResolution(_)));
}

#[tokio::test]
async fn handshake_with_empty_body_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let msg = resolution_message(connect_to(&server).await);
    assert_eq!(msg, "Unable to get Collection ID");
}

#[tokio::test]
async fn handshake_with_malformed_json_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    assert!(matches!(connect_to(&server).await, Err(Error::Decode(_))));
}

#[tokio::test]
async fn endpoint_prefix_and_trailing_slash_are_honoured() {
    let server = MockServer::start().await;
    mount_handshake(&server, "/v1", json!({"collection_id": "c1", "user": "ana"})).await;
    Mock::given(method("GET"))
        .and(path("/v1/image/img-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image_id": "img-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = CollectionClient::connect(
        Credentials::new("pub-key", "secret-key"),
        CollectionOptions::default().with_endpoint(format!("{}/v1//", server.uri())),
    )
    .await
    .unwrap();

    assert_eq!(client.endpoint(), format!("{}/v1", server.uri()));
    assert_eq!(client.user(), "ana");
    let body = client.get_image("img-1", None).await.unwrap();
    assert_eq!(body["image_id"], "img-1");
}

#[tokio::test]
async fn add_image_without_id_posts_to_image() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("POST"))
        .and(path("/image"))
        .and(body_bytes(b"raw-image".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image_id": "generated-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let body = client
        .add_image(b"raw-image".to_vec(), None, false, None)
        .await
        .unwrap();
    assert_eq!(body["image_id"], "generated-1");
}

#[tokio::test]
async fn add_image_with_id_and_update_puts() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("PUT"))
        .and(path("/image/x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image_id": "x"})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .add_image(b"raw-image".to_vec(), Some("x"), true, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn add_image_with_id_without_update_posts() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("POST"))
        .and(path("/image/x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image_id": "x"})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .add_image(b"raw-image".to_vec(), Some("x"), false, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn add_image_from_path_sends_file_content() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("POST"))
        .and(path("/image/cat"))
        .and(header("content-type", "image/png"))
        .and(body_bytes(b"png-content".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image_id": "cat"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(b"png-content").unwrap();

    client
        .add_image(ImageSource::from_path(file.path()), Some("cat"), false, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn add_image_from_missing_path_sends_nothing() {
    let server = MockServer::start().await;
    let client = connected(&server).await;

    let err = client
        .add_image(
            ImageSource::from_path("/no/such/image.jpg"),
            None,
            false,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImageRead { .. }));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "only the handshake should have been sent");
}

#[tokio::test]
async fn get_delete_and_search_by_id_hit_their_paths() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("GET"))
        .and(path("/image/img-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image_id": "img-7"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/image/img-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/img-7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": [{"image_id": "img-8"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let image = client.get_image("img-7", None).await.unwrap();
    assert_eq!(image["image_id"], "img-7");

    let deleted = client.delete_image("img-7", None).await.unwrap();
    assert_eq!(deleted["deleted"], true);

    let found = client.search_images_by_id("img-7", None).await.unwrap();
    assert_eq!(found["results"][0]["image_id"], "img-8");
}

#[tokio::test]
async fn search_images_posts_image_bytes() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_bytes(b"query-image".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let found = client
        .search_images(&b"query-image"[..], None)
        .await
        .unwrap();
    assert_eq!(found["results"], json!([]));
}

#[tokio::test]
async fn get_images_omits_zero_count() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("GET"))
        .and(path("/images"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": []})))
        .expect(3)
        .mount(&server)
        .await;

    client.get_images(None, Some(0), None).await.unwrap();
    client.get_images(None, Some(5), None).await.unwrap();
    client.get_images(Some("img-3"), None, None).await.unwrap();

    let queries: Vec<Option<String>> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/images")
        .map(|r| r.url.query().map(str::to_string))
        .collect();
    assert_eq!(
        queries,
        vec![
            None,
            Some("count=5".to_string()),
            Some("start=img-3".to_string()),
        ]
    );
}

#[tokio::test]
async fn error_statuses_still_return_the_body() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("GET"))
        .and(path("/image/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let body = client.get_image("missing", None).await.unwrap();
    assert_eq!(body["message"], "not found");
}

#[tokio::test]
async fn malformed_response_is_a_decode_error() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/image/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = client.delete_image("a", None).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[tokio::test]
async fn per_call_timeout_is_enforced() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("GET"))
        .and(path("/search/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": []}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = client
        .search_images_by_id("slow", Some(Timeout::Total(Duration::from_millis(200))))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
}

#[tokio::test]
async fn split_timeout_bounds_the_wait_for_a_response() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("GET"))
        .and(path("/image/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(1)),
        )
        .mount(&server)
        .await;

    // The connection itself is quick, so only the read budget can trip.
    let timeout = Timeout::from((Duration::from_secs(5), Duration::from_millis(200)));
    let err = client.get_image("slow", Some(timeout)).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "expected timeout, got {err:?}");
}

#[tokio::test]
async fn split_timeout_connect_budget_does_not_limit_the_response() {
    let server = MockServer::start().await;
    let client = connected(&server).await;
    Mock::given(method("GET"))
        .and(path("/image/steady"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"image_id": "steady"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let timeout = Timeout::from((Duration::from_millis(100), Duration::from_secs(5)));
    for _ in 0..2 {
        let body = client.get_image("steady", Some(timeout)).await.unwrap();
        assert_eq!(body["image_id"], "steady");
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = CollectionClient::connect(
        Credentials::new("pub-key", "secret-key"),
        CollectionOptions::default()
            .with_endpoint(format!("http://127.0.0.1:{port}"))
            .with_max_retries(2),
    )
    .await;

    match result {
        Err(err) => assert!(err.is_connect(), "expected connect error, got {err:?}"),
        Ok(_) => panic!("nothing is listening on port {port}"),
    }
}

#[tokio::test]
async fn invalid_endpoint_is_rejected_before_any_request() {
    let result = CollectionClient::connect(
        Credentials::new("pub-key", "secret-key"),
        CollectionOptions::default().with_endpoint("ftp://files.example.com"),
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
