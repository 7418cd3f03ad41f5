use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, ImageFormat};
use poem::http::StatusCode;
use poem::test::TestClient;
use poem::Endpoint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::{LocalStoreConfig, NamePathConfig, RuntimeConfig, StoreConfig};
use crate::controller::UploadController;
use crate::processor::encoder::encode_to;
use crate::{routes, storage};

const LOCAL_CONFIG: &str = include_str!("../tests/configs/local.yaml");
const BOUNDARY: &str = "picstash-test-boundary";
const URL_PREFIX: &str = "/images/";

fn test_config(root: &Path) -> RuntimeConfig {
    let mut cfg = RuntimeConfig::from_str(LOCAL_CONFIG).unwrap();
    cfg.stores = vec![StoreConfig::Local(LocalStoreConfig {
        root: root.to_path_buf(),
        url_prefix: URL_PREFIX.to_string(),
        name_path: NamePathConfig::default(),
    })];
    cfg
}

async fn setup_environment(cfg: RuntimeConfig) -> anyhow::Result<TestClient<impl Endpoint>> {
    let stores = storage::connect_all(&cfg.stores).await?;
    let store = storage::select_active(stores, cfg.active_store)?;
    let controller = Arc::new(UploadController::new(&cfg, store)?);

    Ok(TestClient::new(routes::router(controller)))
}

fn test_image(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::new_rgb8(width, height);
    encode_to(&img, format).unwrap()
}

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
        Content-Type: application/octet-stream\r\n\r\n",
        BOUNDARY, field, file_name,
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

fn stored_path(root: &Path, link: &str) -> PathBuf {
    root.join(link.trim_start_matches(URL_PREFIX))
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

/// A canned upstream HTTP server.
pub(crate) struct CannedServer {
    /// The base URL of the server.
    pub base: String,

    /// The head of every request received, in order.
    pub requests: Arc<std::sync::Mutex<Vec<String>>>,
}

/// Answers each connection with the next of `responses`, repeating the
/// last one once the rest have been used.
pub(crate) async fn serve_canned(responses: Vec<(&'static str, Vec<u8>)>) -> CannedServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(std::sync::Mutex::new(Vec::new()));

    let log = requests.clone();
    tokio::spawn(async move {
        let mut served = 0;
        while let Ok((mut socket, _)) = listener.accept().await {
            let (status_line, body) = responses[served.min(responses.len() - 1)].clone();
            served += 1;

            let log = log.clone();
            tokio::spawn(async move {
                let head = read_request(&mut socket).await?;
                let is_head = head.starts_with("HEAD ");
                log.lock().unwrap().push(head);

                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len(),
                );
                socket.write_all(head.as_bytes()).await?;
                if !is_head {
                    socket.write_all(&body).await?;
                }
                socket.shutdown().await?;
                Ok::<_, std::io::Error>(())
            });
        }
    });

    CannedServer {
        base: format!("http://{}", addr),
        requests,
    }
}

/// Accepts connections and never answers them.
pub(crate) async fn serve_silent() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    format!("http://{}", addr)
}

/// Reads a request's head and drains its body, returning the head.
async fn read_request(socket: &mut tokio::net::TcpStream) -> std::io::Result<String> {
    let mut request = Vec::new();
    let mut buff = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }

        let n = socket.read(&mut buff).await?;
        if n == 0 {
            break request.len();
        }
        request.extend_from_slice(&buff[..n]);
    };

    let head = String::from_utf8_lossy(&request[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut remaining = content_length.saturating_sub(request.len() - head_end);
    while remaining > 0 {
        let n = socket.read(&mut buff).await?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    Ok(head)
}

#[tokio::test]
async fn test_file_upload() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;
    let image = test_image(ImageFormat::Jpeg, 64, 48);

    let res = app
        .post("/file")
        .content_type(multipart_content_type())
        .body(multipart_body("image", "cat.jpg", &image))
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    let info = res.json().await;
    let info = info.value().object();

    let link = info.get("link").string().to_string();
    assert!(link.starts_with(URL_PREFIX));
    assert_eq!(info.get("mime").string(), "image/jpeg");
    assert_eq!(info.get("type").string(), "original");
    assert_eq!(info.get("name").string(), "cat.jpg");
    assert_eq!(info.get("size").i64(), image.len() as i64);

    let stored = std::fs::read(stored_path(root.path(), &link))?;
    assert_eq!(stored, image);

    Ok(())
}

#[tokio::test]
async fn test_file_upload_missing_field() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;
    let image = test_image(ImageFormat::Png, 8, 8);

    let res = app
        .post("/file")
        .content_type(multipart_content_type())
        .body(multipart_body("picture", "cat.png", &image))
        .send()
        .await;

    res.assert_status(StatusCode::BAD_REQUEST);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "Error processing file!");
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_file_upload_not_an_image() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;

    let res = app
        .post("/file")
        .content_type(multipart_content_type())
        .body(multipart_body("image", "notes.txt", b"these are not pixels"))
        .send()
        .await;

    res.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "Error detecting mime type!");
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_file_upload_too_large() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut cfg = test_config(root.path());
    cfg.max_file_size = 16;
    let app = setup_environment(cfg).await?;
    let image = test_image(ImageFormat::Png, 32, 32);
    assert!(image.len() > 16);

    let res = app
        .post("/file")
        .content_type(multipart_content_type())
        .body(multipart_body("image", "big.png", &image))
        .send()
        .await;

    res.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_file_upload_is_downscaled() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut cfg = test_config(root.path());
    cfg.max_dimension = Some(16);
    let app = setup_environment(cfg).await?;
    let image = test_image(ImageFormat::Png, 64, 48);

    let res = app
        .post("/file")
        .content_type(multipart_content_type())
        .body(multipart_body("image", "wide.png", &image))
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    let info = res.json().await;
    let info = info.value().object();

    let path = stored_path(root.path(), info.get("link").string());
    let stored = std::fs::read(&path)?;
    assert_eq!(info.get("size").i64(), stored.len() as i64);

    let img = image::load_from_memory_with_format(&stored, ImageFormat::Png)?;
    assert_eq!(img.dimensions(), (16, 12));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_names() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;
    let image = test_image(ImageFormat::Png, 8, 8);

    let requests = (0..8).map(|i| {
        app.post("/file")
            .content_type(multipart_content_type())
            .body(multipart_body("image", &format!("{}.png", i), &image))
            .send()
    });

    let mut links = Vec::new();
    for res in futures::future::join_all(requests).await {
        res.assert_status(StatusCode::OK);
        let info = res.json().await;
        links.push(info.value().object().get("link").string().to_string());
    }

    links.sort();
    links.dedup();
    assert_eq!(links.len(), 8);
    assert_eq!(count_files(root.path()), 8);

    Ok(())
}

#[tokio::test]
async fn test_url_upload() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;
    let image = test_image(ImageFormat::Png, 12, 12);
    let base = serve_canned(vec![("200 OK", image.clone())]).await.base;

    let res = app
        .get("/url")
        .query("image", &format!("{}/cat.png", base))
        .send()
        .await;

    res.assert_status(StatusCode::OK);
    let info = res.json().await;
    let info = info.value().object();

    assert_eq!(info.get("mime").string(), "image/png");
    assert_eq!(info.get("name").string(), "");
    assert_eq!(info.get("size").i64(), image.len() as i64);

    let stored = std::fs::read(stored_path(root.path(), info.get("link").string()))?;
    assert_eq!(stored, image);

    Ok(())
}

#[tokio::test]
async fn test_url_upload_not_found() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;
    let base = serve_canned(vec![("404 Not Found", Vec::new())]).await.base;

    let res = app
        .get("/url")
        .query("image", &format!("{}/missing.png", base))
        .send()
        .await;

    res.assert_status(StatusCode::BAD_REQUEST);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "Error dowloading URL!");
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_url_upload_empty_body() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;
    let base = serve_canned(vec![("200 OK", Vec::new())]).await.base;

    let res = app
        .get("/url")
        .query("image", &format!("{}/empty.png", base))
        .send()
        .await;

    res.assert_status(StatusCode::BAD_REQUEST);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "Error dowloading URL!");
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_url_upload_without_url() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let app = setup_environment(test_config(root.path())).await?;

    let res = app.get("/url").send().await;

    res.assert_status(StatusCode::BAD_REQUEST);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "Error dowloading URL!");

    Ok(())
}

#[tokio::test]
async fn test_url_upload_times_out() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut cfg = test_config(root.path());
    cfg.download_timeout_secs = 1;
    let app = setup_environment(cfg).await?;
    let base = serve_silent().await;

    let started = std::time::Instant::now();
    let res = app
        .get("/url")
        .query("image", &format!("{}/slow.png", base))
        .send()
        .await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    res.assert_status(StatusCode::BAD_REQUEST);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "Error dowloading URL!");
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_failing_store_probe_is_unavailable() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut cfg = test_config(root.path());

    // Every mapped path escapes the root, so every probe fails.
    cfg.stores = vec![StoreConfig::Local(LocalStoreConfig {
        root: root.path().to_path_buf(),
        url_prefix: URL_PREFIX.to_string(),
        name_path: NamePathConfig {
            pattern: "^.*$".to_string(),
            template: "../$0".to_string(),
        },
    })];
    let app = setup_environment(cfg).await?;
    let image = test_image(ImageFormat::Png, 8, 8);

    for _ in 0..2 {
        let res = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            app.post("/file")
                .content_type(multipart_content_type())
                .body(multipart_body("image", "cat.png", &image))
                .send(),
        )
        .await?;

        res.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body = res.json().await;
        assert_eq!(body.value().object().get("error").string(), "Unable to generate identifier!");
    }
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

#[tokio::test]
async fn test_oversized_field_is_rejected_while_streaming() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut cfg = test_config(root.path());
    cfg.max_file_size = 1024;
    let app = setup_environment(cfg).await?;

    let mut data = test_image(ImageFormat::Png, 8, 8);
    data.resize(4 * 1024 * 1024, 0);

    let res = app
        .post("/file")
        .content_type(multipart_content_type())
        .body(multipart_body("image", "huge.png", &data))
        .send()
        .await;

    res.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    let body = res.json().await;
    assert_eq!(body.value().object().get("error").string(), "File too large!");
    assert_eq!(count_files(root.path()), 0);

    Ok(())
}

