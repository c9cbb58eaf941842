use super::*;
use crate::events::InboundEvent;
use crate::pipeline::NormalizedRecord;
use crate::session::{
    EventSink, MediaSource, RetryPolicy, SessionEngine, SessionHandle, SessionSettings,
};
use crate::sidecar::{CALLBACK_PATH, CallbackRegistry, callback_router};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const KEY: &str = "s3cret";

#[derive(Default)]
struct RecordingHandle {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionHandle for RecordingHandle {
    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(format!("text:{}:{}", to, body));
        Ok(())
    }

    async fn send_image(
        &self,
        to: &str,
        _source: &MediaSource,
        filename: &str,
        _caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(format!("image:{}:{}", to, filename));
        Ok(())
    }

    async fn send_file(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        if let MediaSource::Path(path) = source {
            assert!(path.exists(), "staged file must exist while sending");
        }
        self.sent.lock().unwrap().push(format!(
            "file:{}:{}:{}",
            to,
            filename,
            caption.unwrap_or_default()
        ));
        Ok(())
    }

    async fn decrypt_media(&self, _event: &InboundEvent) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn connection_state(&self) -> anyhow::Result<String> {
        Ok("CONNECTED".into())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Connects immediately for the first `instant_connects` attempts; later
/// attempts publish a QR artifact and never finish.
struct TestEngine {
    handle: Arc<RecordingHandle>,
    instant_connects: usize,
    connects: AtomicUsize,
}

#[async_trait]
impl SessionEngine for TestEngine {
    async fn connect(
        &self,
        _session_name: &str,
        sink: EventSink,
    ) -> anyhow::Result<Arc<dyn SessionHandle>> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        if n >= self.instant_connects {
            sink.qr_captured("data:image/png;base64,QR".into());
            std::future::pending::<()>().await;
        }
        Ok(self.handle.clone())
    }
}

struct Harness {
    app: Router,
    session: SessionManager,
    handle: Arc<RecordingHandle>,
    audit: Arc<AuditLog>,
    staging: TempDir,
    uploads: TempDir,
    _credentials: TempDir,
}

fn harness(instant_connects: usize) -> Harness {
    let credentials = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let uploads = TempDir::new().unwrap();
    let handle = Arc::new(RecordingHandle::default());
    let engine = Arc::new(TestEngine {
        handle: handle.clone(),
        instant_connects,
        connects: AtomicUsize::new(0),
    });
    let settings = SessionSettings {
        session_name: "test".into(),
        credentials_dir: credentials.path().to_path_buf(),
        retry: RetryPolicy::default(),
        health_interval: Duration::from_secs(3600),
        probe_timeout: Duration::from_secs(5),
        restart_cooldown: Duration::from_secs(10),
        close_timeout: Duration::from_secs(1),
        purge_on_conflict: false,
    };
    let (session, _inbound) = SessionManager::spawn(engine, settings);
    let audit = Arc::new(AuditLog::new(10));

    let state = AppState {
        session: session.clone(),
        dispatcher: Arc::new(Dispatcher::new(Arc::new(session.clone()))),
        audit: audit.clone(),
        branding: Arc::new(Branding {
            company_name: "Acme".into(),
            client_id: "0042".into(),
            terms_url: "https://acme.example/terms".into(),
        }),
        staging_dir: staging.path().to_path_buf(),
        max_upload_bytes: 1024,
        metrics: None,
    };
    let parts = RouterParts {
        auth: AuthConfig::new(KEY),
        uploads_dir: uploads.path().to_path_buf(),
        extra: callback_router(Arc::new(CallbackRegistry::new()), ""),
    };

    Harness {
        app: build_router(state, parts),
        session,
        handle,
        audit,
        staging,
        uploads,
        _credentials: credentials,
    }
}

async fn connect(h: &Harness) {
    h.session.start().await;
    let mut rx = h.session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.connected()))
        .await
        .unwrap()
        .unwrap();
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", KEY))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart(number: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "XBOUNDARYX";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"number\"\r\n\r\n{number}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\nmonthly\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/send-file")
        .header("authorization", format!("Bearer {}", KEY))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json(resp: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn staged_files(h: &Harness) -> usize {
    std::fs::read_dir(h.staging.path()).unwrap().count()
}

#[tokio::test]
async fn test_health_endpoint_returns_json() {
    let h = harness(1);
    let resp = h.app.oneshot(get("/api/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], crate::VERSION);
}

#[tokio::test]
async fn test_status_is_public() {
    let h = harness(1);
    let resp = h.app.clone().oneshot(get("/status", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json(resp).await,
        serde_json::json!({ "connected": false, "phase": "idle" })
    );

    connect(&h).await;
    let resp = h.app.oneshot(get("/status", None)).await.unwrap();
    assert_eq!(
        json(resp).await,
        serde_json::json!({ "connected": true, "phase": "connected" })
    );
}

#[tokio::test]
async fn test_protected_routes_require_bearer() {
    let h = harness(1);

    let missing = h.app.clone().oneshot(get("/messages", None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = h
        .app
        .clone()
        .oneshot(get("/messages", Some("nope")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
    assert!(json(wrong).await["error"].is_string());

    let ok = h.app.oneshot(get("/messages", Some(KEY))).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_send_requires_connection() {
    let h = harness(1);
    let resp = h
        .app
        .oneshot(post_json(
            "/send",
            serde_json::json!({ "number": "15550100000", "message": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.headers()[header::RETRY_AFTER], "5");
    assert!(json(resp).await["error"].is_string());
    assert!(h.handle.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_text() {
    let h = harness(1);
    connect(&h).await;

    let resp = h
        .app
        .oneshot(post_json(
            "/send",
            serde_json::json!({ "number": "15550100000", "message": "hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["recipient"], "15550100000@c.us");
    assert_eq!(body["kind"], "text");
    assert_eq!(
        *h.handle.sent.lock().unwrap(),
        vec!["text:15550100000@c.us:hi".to_string()]
    );
}

#[tokio::test]
async fn test_send_file_url_image() {
    let h = harness(1);
    connect(&h).await;

    let resp = h
        .app
        .oneshot(post_json(
            "/send",
            serde_json::json!({
                "number": "15550100000",
                "fileUrl": "https://cdn.example.com/cat.png"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["kind"], "image");
}

#[tokio::test]
async fn test_send_rejects_bad_requests() {
    let h = harness(1);
    connect(&h).await;

    let missing_payload = h
        .app
        .clone()
        .oneshot(post_json("/send", serde_json::json!({ "number": "1555" })))
        .await
        .unwrap();
    assert_eq!(missing_payload.status(), StatusCode::BAD_REQUEST);

    let not_json = Request::builder()
        .method("POST")
        .uri("/send")
        .header("authorization", format!("Bearer {}", KEY))
        .header("content-type", "application/json")
        .body(Body::from("{"))
        .unwrap();
    let resp = h.app.clone().oneshot(not_json).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let unsupported = h
        .app
        .oneshot(post_json(
            "/send",
            serde_json::json!({
                "number": "1555",
                "fileUrl": "https://cdn.example.com/setup.exe"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(unsupported.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_send_file_multipart() {
    let h = harness(1);
    connect(&h).await;

    let resp = h
        .app
        .clone()
        .oneshot(multipart("15550100000", "report.pdf", b"%PDF-1.4"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["kind"], "file");
    assert_eq!(
        *h.handle.sent.lock().unwrap(),
        vec!["file:15550100000@c.us:report.pdf:monthly".to_string()]
    );
    assert_eq!(staged_files(&h), 0);
}

#[tokio::test]
async fn test_send_file_over_limit() {
    let h = harness(1);
    connect(&h).await;

    let resp = h
        .app
        .clone()
        .oneshot(multipart("15550100000", "big.pdf", &[b'x'; 2048]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(staged_files(&h), 0);
    assert!(h.handle.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_file_while_disconnected_cleans_staging() {
    let h = harness(1);
    let resp = h
        .app
        .clone()
        .oneshot(multipart("15550100000", "photo.jpg", b"jpeg"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(staged_files(&h), 0);
}

#[tokio::test]
async fn test_qr_data() {
    let h = harness(0);

    let resp = h
        .app
        .clone()
        .oneshot(get("/qr-data", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json(resp).await,
        serde_json::json!({ "status": false, "message": "QR not generated yet" })
    );

    h.session.start().await;
    let mut rx = h.session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.last_qr.is_some()))
        .await
        .unwrap()
        .unwrap();

    let resp = h.app.oneshot(get("/qr-data", Some(KEY))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json(resp).await,
        serde_json::json!({ "status": true, "data": "data:image/png;base64,QR" })
    );
}

#[tokio::test]
async fn test_config_never_exposes_access_key() {
    let h = harness(1);
    let resp = h.app.oneshot(get("/config", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(
        body,
        serde_json::json!({
            "companyName": "Acme",
            "clientId": "0042",
            "termsUrl": "https://acme.example/terms"
        })
    );
    assert!(!body.to_string().contains(KEY));
}

#[tokio::test]
async fn test_restart_accepted_then_conflict() {
    // The first connect is instant; the reconnect after the restart hangs.
    let h = harness(1);
    connect(&h).await;

    let first = h
        .app
        .clone()
        .oneshot(post_json("/restart", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(json(first).await, serde_json::json!({ "restarting": true }));

    let second = h
        .app
        .oneshot(post_json(
            "/restart",
            serde_json::json!({ "purgeCredentials": true }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(
        json(second).await,
        serde_json::json!({ "error": "restart already in progress" })
    );
}

#[tokio::test]
async fn test_restart_rejects_malformed_body() {
    let h = harness(1);
    let req = Request::builder()
        .method("POST")
        .uri("/restart")
        .header("authorization", format!("Bearer {}", KEY))
        .body(Body::from("purge please"))
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_messages_lists_audit_oldest_first() {
    let h = harness(1);
    h.audit.append(NormalizedRecord::text("111", "first"));
    h.audit.append(NormalizedRecord::text("222", "second"));

    let resp = h.app.oneshot(get("/messages", Some(KEY))).await.unwrap();
    let body = json(resp).await;
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["from"], "111");
    assert_eq!(records[0]["text"], "first");
    assert_eq!(records[1]["from"], "222");
    assert!(records[0]["timestamp"].is_string());
}

#[tokio::test]
async fn test_uploads_served_statically() {
    let h = harness(1);
    std::fs::write(h.uploads.path().join("111-1.png"), b"png-bytes").unwrap();

    let resp = h
        .app
        .clone()
        .oneshot(get("/uploads/111-1.png", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"png-bytes");

    let missing = h.app.oneshot(get("/uploads/nope.png", None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let h = harness(1);
    let resp = h.app.oneshot(get("/metrics", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_callback_router_is_merged() {
    let h = harness(1);
    let req = Request::builder()
        .method("POST")
        .uri(CALLBACK_PATH)
        .header("content-type", "application/json")
        .body(Body::from(r#"{"type":"state","state":"CONNECTED"}"#))
        .unwrap();
    let resp = h.app.oneshot(req).await.unwrap();
    // No session has registered a sink in this harness.
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn test_bridge_error_renders_json() {
    let resp = BridgeError::InvalidRequest("bad".into()).into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.headers().get(header::RETRY_AFTER).is_none());
    let resp = BridgeError::NotConnected.into_response();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
    let resp = BridgeError::Session("handle closed".into()).into_response();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
}

#[test]
fn test_auth_config_debug_redacts() {
    let debug = format!("{:?}", AuthConfig::new(KEY));
    assert!(!debug.contains(KEY));
}
