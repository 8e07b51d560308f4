//! Common test utilities for media-batch-dl integration tests

#![allow(dead_code)]

use media_batch_dl::{Config, MediaKind, MediaReference};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fake PNG payload: the signature followed by filler
pub fn png_bytes(seed: u8) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend(std::iter::repeat(seed).take(2048));
    data
}

/// Config for tests against a local mock server: short timeout, fast backoff
pub fn test_config(output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.max_concurrent_downloads = 2;
    config.download.request_timeout = Duration::from_millis(500);
    config.download.user_agent = "media-batch-dl-test".to_string();
    config.retry.base_delay = Duration::from_millis(10);
    config.output.output_dir = output_dir.to_path_buf();
    config
}

/// Serve `body` at `route` with status 200
pub async fn mount_media(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Answer `route` with a bare status code
pub async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Reference to `route` on the mock server
pub fn reference(server: &MockServer, id: &str, route: &str, kind: MediaKind) -> MediaReference {
    MediaReference::new(id, format!("{}{}", server.uri(), route), kind)
}
