use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, extract::Multipart, http::StatusCode, routing::post};
use kanjian::{
  frame::Frame,
  relay::{self, EdgeRelay, RelayError},
  server::DEFAULT_MAX_FRAME_BYTES,
};
use reqwest::multipart::{Form, Part};
use tokio::net::TcpListener;
use url::Url;

const ORIGINAL: &[u8] = b"\xff\xd8\xff\xe0 original frame bytes \x00\x01\x02";

async fn spawn(router: Router) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
  addr
}

fn infer_url(addr: SocketAddr) -> Url {
  Url::parse(&format!("http://{addr}/infer")).unwrap()
}

/// 一个已经关闭的端口
async fn closed_port() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  drop(listener);
  addr
}

async fn spawn_relay(downstream: Url, timeout: Duration) -> SocketAddr {
  let relay = EdgeRelay::new(downstream, timeout).unwrap();
  spawn(relay::router(Arc::new(relay), DEFAULT_MAX_FRAME_BYTES)).await
}

async fn post_frame(addr: SocketAddr, bytes: &[u8]) -> reqwest::Response {
  let part = Part::bytes(bytes.to_vec())
    .file_name("capture.jpg")
    .mime_str("image/jpeg")
    .unwrap();
  reqwest::Client::new()
    .post(format!("http://{addr}/frames"))
    .multipart(Form::new().part("frame", part))
    .send()
    .await
    .unwrap()
}

fn echo_downstream() -> Router {
  Router::new().route(
    "/infer",
    post(|mut multipart: Multipart| async move {
      let field = multipart.next_field().await.unwrap().unwrap();
      assert_eq!(field.name(), Some("frame"));
      assert_eq!(field.file_name(), Some("frame.jpg"));
      assert_eq!(field.content_type(), Some("image/jpeg"));
      let data = field.bytes().await.unwrap();

      let mut body = b"annotated:".to_vec();
      body.extend_from_slice(&data);
      body
    }),
  )
}

fn failing_downstream() -> Router {
  Router::new().route(
    "/infer",
    post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
  )
}

fn slow_downstream() -> Router {
  Router::new().route(
    "/infer",
    post(|| async {
      tokio::time::sleep(Duration::from_secs(3)).await;
      "too late"
    }),
  )
}

async fn assert_original(response: reqwest::Response) {
  assert_eq!(response.status(), reqwest::StatusCode::OK);
  assert_eq!(response.headers()["content-type"], "image/jpeg");
  assert_eq!(&response.bytes().await.unwrap()[..], ORIGINAL);
}

#[tokio::test]
async fn downstream_image_is_returned_verbatim() {
  let downstream = spawn(echo_downstream()).await;
  let relay = spawn_relay(infer_url(downstream), Duration::from_secs(5)).await;

  let response = post_frame(relay, ORIGINAL).await;
  assert_eq!(response.status(), reqwest::StatusCode::OK);
  assert_eq!(response.headers()["content-type"], "image/jpeg");

  let mut expected = b"annotated:".to_vec();
  expected.extend_from_slice(ORIGINAL);
  assert_eq!(&response.bytes().await.unwrap()[..], &expected[..]);
}

#[tokio::test]
async fn connection_error_falls_back_to_original_bytes() {
  let relay = spawn_relay(infer_url(closed_port().await), Duration::from_secs(5)).await;
  assert_original(post_frame(relay, ORIGINAL).await).await;
}

#[tokio::test]
async fn error_status_falls_back_to_original_bytes() {
  let downstream = spawn(failing_downstream()).await;
  let relay = spawn_relay(infer_url(downstream), Duration::from_secs(5)).await;
  assert_original(post_frame(relay, ORIGINAL).await).await;
}

#[tokio::test]
async fn timeout_falls_back_to_original_bytes() {
  let downstream = spawn(slow_downstream()).await;
  let relay = spawn_relay(infer_url(downstream), Duration::from_millis(200)).await;

  let started = std::time::Instant::now();
  assert_original(post_frame(relay, ORIGINAL).await).await;
  assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn forward_failures_are_classified() {
  let frame = Frame::new(ORIGINAL, Some("image/jpeg".into()));

  let unreachable = EdgeRelay::new(infer_url(closed_port().await), Duration::from_secs(5)).unwrap();
  assert!(matches!(
    unreachable.forward(&frame).await,
    Err(RelayError::UpstreamUnreachable(_))
  ));

  let failing = EdgeRelay::new(
    infer_url(spawn(failing_downstream()).await),
    Duration::from_secs(5),
  )
  .unwrap();
  match failing.forward(&frame).await {
    Err(RelayError::UpstreamStatus(status, body)) => {
      assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
      assert_eq!(body, "boom");
    }
    other => panic!("unexpected result: {other:?}"),
  }

  let slow = EdgeRelay::new(
    infer_url(spawn(slow_downstream()).await),
    Duration::from_millis(200),
  )
  .unwrap();
  assert!(matches!(
    slow.forward(&frame).await,
    Err(RelayError::UpstreamTimeout(_))
  ));
}

#[tokio::test]
async fn missing_frame_field_is_rejected() {
  let relay = spawn_relay(infer_url(closed_port().await), Duration::from_secs(5)).await;

  let response = reqwest::Client::new()
    .post(format!("http://{relay}/frames"))
    .multipart(Form::new().text("other", "value"))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn any_origin_is_allowed() {
  let relay = spawn_relay(infer_url(closed_port().await), Duration::from_secs(5)).await;
  let client = reqwest::Client::new();

  let preflight = client
    .request(reqwest::Method::OPTIONS, format!("http://{relay}/frames"))
    .header("origin", "http://camera.example")
    .header("access-control-request-method", "POST")
    .header("access-control-request-headers", "x-custom-header")
    .send()
    .await
    .unwrap();
  assert!(preflight.status().is_success());
  assert_eq!(preflight.headers()["access-control-allow-origin"], "*");

  let part = Part::bytes(ORIGINAL.to_vec()).file_name("capture.jpg");
  let response = client
    .post(format!("http://{relay}/frames"))
    .header("origin", "http://camera.example")
    .multipart(Form::new().part("frame", part))
    .send()
    .await
    .unwrap();
  assert_eq!(response.headers()["access-control-allow-origin"], "*");
  assert_original(response).await;
}
