/// End-to-end tests of the blob pipeline through the HTTP router
///
/// A wiremock server plays both the repository directory and the hosting
/// endpoint; the cache lives in a temporary directory.
use aurora_blobd::{config::ServerConfig, context::AppContext, server::build_router};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use libipld::{multihash::Multihash, Cid};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HANDLE: &str = "alice.example.com";
const DID: &str = "did:plc:ewvi7nxzyoun6zhxrhs64oiz";

/// CIDv1, raw codec, sha2-256
fn cid_for(data: &[u8]) -> String {
    let mh = Multihash::wrap(0x12, &Sha256::digest(data)).unwrap();
    Cid::new_v1(0x55, mh).to_string()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

struct TestService {
    dir: TempDir,
    server: MockServer,
}

impl TestService {
    async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/dir/{}", HANDLE)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pds": [server.uri()],
                "did": DID,
            })))
            .mount(&server)
            .await;

        Self {
            dir: tempdir().unwrap(),
            server,
        }
    }

    fn blob_dir(&self) -> PathBuf {
        self.dir.path().join("blobs")
    }

    /// Router over the cache directory, locating through `locator_url`
    async fn router_with(&self, locator_url: &str) -> Router {
        let vars: HashMap<&str, String> = HashMap::from([
            ("BLOBD_DATA_DIR", self.dir.path().display().to_string()),
            ("BLOBD_LOCATOR_URL", locator_url.to_string()),
            ("BLOBD_FETCH_TIMEOUT_SECS", "5".to_string()),
        ]);
        let config = ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        build_router(AppContext::new(config).await.unwrap())
    }

    async fn router(&self) -> Router {
        self.router_with(&format!("{}/dir", self.server.uri())).await
    }

    async fn serve_blob(&self, cid: &str, body: Vec<u8>, content_type: &str, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.sync.getBlob"))
            .and(query_param("did", DID))
            .and(query_param("cid", cid))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }
}

async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_of(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn files_in(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_fetch_persist_and_serve_offline() {
    let svc = TestService::start().await;
    let data = png(40, 20);
    let cid = cid_for(&data);
    svc.serve_blob(&cid, data.clone(), "image/png", 1).await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::ETAG].to_str().unwrap(),
        format!("\"{}\"", cid)
    );
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=31536000, immutable"
    );
    assert_eq!(body_of(response).await, data);

    let mut files = files_in(&svc.blob_dir());
    files.sort();
    assert_eq!(files, vec![format!("{}.blob", cid), format!("{}.json", cid)]);

    // Locator unreachable: the cache alone answers
    let offline = svc.router_with("http://127.0.0.1:9/dir").await;
    let response = get(&offline, &format!("/{}/{}", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_of(response).await, data);
}

#[tokio::test]
async fn test_integrity_mismatch_is_bad_gateway_and_stores_nothing() {
    let svc = TestService::start().await;
    let cid = cid_for(b"what was asked for");
    svc.serve_blob(&cid, b"something else".to_vec(), "image/png", 1)
        .await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(body["error"], "UpstreamError");
    assert!(files_in(&svc.blob_dir()).is_empty());
}

#[tokio::test]
async fn test_webp_derivative_next_to_untouched_original() {
    let svc = TestService::start().await;
    let data = png(400, 100);
    let cid = cid_for(&data);
    svc.serve_blob(&cid, data.clone(), "image/png", 1).await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}?format=webp&width=200", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(
        response.headers()[header::ETAG].to_str().unwrap(),
        format!("\"{}.200x0px.webp\"", cid)
    );
    let webp = body_of(response).await;
    let decoded = image::load_from_memory(&webp).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 50));

    let derivative = svc.blob_dir().join(format!("{}.200x0px.webp", cid));
    assert_eq!(std::fs::read(&derivative).unwrap(), webp);

    // Same request again comes off disk byte for byte
    let again = get(&router, &format!("/{}/{}?format=webp&width=200", HANDLE, cid)).await;
    assert_eq!(body_of(again).await, webp);

    let raw = get(&router, &format!("/{}/{}?format=raw", HANDLE, cid)).await;
    assert_eq!(raw.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_of(raw).await, data);
}

#[tokio::test]
async fn test_if_none_match_answers_not_modified() {
    let svc = TestService::start().await;
    let data = png(8, 8);
    let cid = cid_for(&data);
    svc.serve_blob(&cid, data, "image/png", 1).await;

    let router = svc.router().await;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{}/{}", HANDLE, cid))
                .header(header::IF_NONE_MATCH, format!("\"{}\"", cid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_of(response).await.is_empty());
}

#[tokio::test]
async fn test_range_request() {
    let svc = TestService::start().await;
    let data = b"0123456789".to_vec();
    let cid = cid_for(&data);
    svc.serve_blob(&cid, data, "application/octet-stream", 1)
        .await;

    let router = svc.router().await;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{}/{}", HANDLE, cid))
                .header(header::RANGE, "bytes=2-5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    assert_eq!(body_of(response).await, b"2345");
}

#[tokio::test]
async fn test_inspect_returns_metadata() {
    let svc = TestService::start().await;
    let data = png(10, 10);
    let cid = cid_for(&data);
    svc.serve_blob(&cid, data.clone(), "image/png", 1).await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}/inspect", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(body["cid"], cid);
    assert_eq!(body["size"], data.len() as u64);
    assert_eq!(body["mime"], "image/png");
    assert_eq!(body["contentType"], "image/png");
    assert_eq!(body["source"]["did"], DID);
    assert_eq!(body["source"]["pds"], svc.server.uri());
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn test_not_found_cases() {
    let svc = TestService::start().await;
    Mock::given(method("GET"))
        .and(path("/dir/nobody.example.com"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&svc.server)
        .await;
    let router = svc.router().await;

    // Not a CID at all
    let response = get(&router, &format!("/{}/not-a-cid", HANDLE)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // CIDv0 is not accepted
    let response = get(
        &router,
        &format!("/{}/QmdfTbBqBPQ7VNxZEYEj14VmRuZBkqFbiwReogJgS1zR1n", HANDLE),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown identity
    let cid = cid_for(b"orphan");
    let response = get(&router, &format!("/nobody.example.com/{}", cid)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown output format
    let response = get(&router, &format!("/{}/{}?format=tiff", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_derivative_is_refused() {
    let svc = TestService::start().await;
    let data = png(40, 20);
    let cid = cid_for(&data);
    svc.serve_blob(&cid, data.clone(), "image/png", 1).await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&router, &format!("/{}/{}?format=png&width=60000", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let mut files = files_in(&svc.blob_dir());
    files.sort();
    assert_eq!(files, vec![format!("{}.blob", cid), format!("{}.json", cid)]);
}

#[tokio::test]
async fn test_remote_blob_not_found() {
    let svc = TestService::start().await;
    let cid = cid_for(b"gone");
    Mock::given(method("GET"))
        .and(path("/xrpc/com.atproto.sync.getBlob"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "BlobNotFound",
            "message": "Blob not found"
        })))
        .mount(&svc.server)
        .await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(files_in(&svc.blob_dir()).is_empty());
}

#[tokio::test]
async fn test_remote_server_error_is_bad_gateway() {
    let svc = TestService::start().await;
    let cid = cid_for(b"unlucky");
    Mock::given(method("GET"))
        .and(path("/xrpc/com.atproto.sync.getBlob"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": "InternalServerError",
            "message": "Internal Server Error"
        })))
        .mount(&svc.server)
        .await;

    let router = svc.router().await;
    let response = get(&router, &format!("/{}/{}", HANDLE, cid)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(body["error"], "UpstreamError");
    assert!(files_in(&svc.blob_dir()).is_empty());
}

#[tokio::test]
async fn test_service_endpoints() {
    let svc = TestService::start().await;
    let router = svc.router().await;

    let response = get(&router, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_of(response).await, b"blobd active");

    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(body["status"], "ok");

    // Any blob route records request metrics
    let response = get(&router, &format!("/{}/not-a-cid", HANDLE)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&router, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_of(response).await).unwrap();
    assert!(text.contains("blobd_http_requests_total"));

    let response = get(&router, "/a/b/c/d").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
