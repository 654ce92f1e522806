//! Integration tests for the HTTP transport and full fetch runs.
//!
//! These tests drive real requests against wiremock servers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvest::app::AppContext;
use harvest::config::Config;
use harvest::domain::request::DEFAULT_USER_AGENT;
use harvest::domain::{PreparedRequest, Request, RequestDefaults};
use harvest::engine::{FetchMode, Fetcher, ModuleClass};
use harvest::manifest::{body_file_name, Manifest, RunOptions};
use harvest::transport::{HttpTransport, Transport};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> HttpTransport {
    HttpTransport::new(&RequestDefaults::default()).expect("client should build")
}

fn prepared(url: String) -> PreparedRequest {
    PreparedRequest {
        url,
        method: Method::GET,
        headers: HeaderMap::new(),
        body: None,
        timeout: Duration::from_secs(5),
        follow_redirects: true,
    }
}

#[tokio::test]
async fn test_get_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-source", "mock")
                .set_body_string("<feed/>"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/feed.xml", server.uri());
    let response = transport().perform(&prepared(url.clone())).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.url, url);
    assert_eq!(response.text(), "<feed/>");
    assert_eq!(response.headers["x-source"], "mock");
}

#[tokio::test]
async fn test_error_status_is_not_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = transport()
        .perform(&prepared(format!("{}/gone", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_redirect_policy_per_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/new", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let transport = transport();
    let mut request = prepared(format!("{}/old", server.uri()));

    let followed = transport.perform(&request).await.unwrap();
    assert_eq!(followed.status, StatusCode::OK);
    assert_eq!(followed.text(), "moved");

    request.follow_redirects = false;
    let stopped = transport.perform(&request).await.unwrap();
    assert_eq!(stopped.status, StatusCode::FOUND);
}

#[tokio::test]
async fn test_request_timeout_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut request = prepared(format!("{}/slow", server.uri()));
    request.timeout = Duration::from_millis(50);

    assert!(transport().perform(&request).await.is_err());
}

/// Fetchable for the end-to-end run: the module state shares `log`.
#[derive(Default)]
struct Collected {
    log: Arc<Mutex<Vec<String>>>,
    progress: Vec<u8>,
}

struct Search {
    log: Arc<Mutex<Vec<String>>>,
}

impl Search {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[tokio::test]
async fn test_fetcher_run_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .and(body_string("q=rust+lang&page=2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("results"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let base = server.uri();
    let search = ModuleClass::new("search", |collected: &Collected| Search {
        log: Arc::clone(&collected.log),
    })
    .mode(FetchMode::Concurrent)
    .request(move |_: &Search| {
        Request::post(format!("{base}/search"))
            .form("q", "rust lang")
            .form("page", "2")
            .process(|s: &mut Search, r| {
                s.push(format!("processed {}", r.text()));
                Ok(())
            })
    })
    .request({
        let base = server.uri();
        move |_: &Search| Request::get(format!("{base}/broken"))
    })
    .on_failure(|s, f| {
        s.push(format!("failure {}", f.status.map(|c| c.as_u16()).unwrap_or(0)));
        Ok(())
    })
    .build();

    let mut fetcher = Fetcher::new(Collected::default(), Arc::new(transport()))
        .workers(2)
        .on_progress(|collected, percent| {
            collected.progress.push(percent);
            Ok(())
        })
        .module(search);

    fetcher.fetch().await.unwrap();

    let mut log = fetcher.fetchable().log.lock().unwrap().clone();
    log.sort();
    assert_eq!(log, vec!["failure 500", "processed results"]);
    assert_eq!(fetcher.fetchable().progress, vec![0, 50, 100]);
}

#[tokio::test]
async fn test_manifest_run_stores_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<a/>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<b/>"))
        .mount(&server)
        .await;

    let manifest = format!(
        r#"
name = "mock"

[vars]
base = "{}"

[[modules]]
name = "feeds"
mode = "concurrent"

[[modules.requests]]
url = "{{base}}/a.xml"

[[modules.requests]]
url = "{{base}}/b.xml"
"#,
        server.uri()
    );

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let ctx = AppContext::from_config(Config::default()).expect("context should build");
    let options = RunOptions {
        out_dir: Some(temp_dir.path().to_path_buf()),
        strict: true,
    };
    let mut fetcher = Manifest::parse(&manifest)
        .expect("manifest should parse")
        .into_fetcher(&ctx, options)
        .expect("manifest should validate");

    fetcher.fetch().await.unwrap();

    let a_url = format!("{}/a.xml", server.uri());
    let stored = temp_dir
        .path()
        .join("feeds")
        .join(body_file_name(&Method::GET, &a_url, None));
    assert_eq!(std::fs::read_to_string(stored).unwrap(), "<a/>");
    assert_eq!(fetcher.fetchable().summary().succeeded, 2);
}
