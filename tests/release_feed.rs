use std::time::Duration;

use frida_installer::InstallerError;
use frida_installer::install::download::GitHubReleaseFeed;
use frida_installer::install::download::ReleaseFeed;
use pretty_assertions::assert_eq;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

fn feed(server: &MockServer, per_page: u32) -> GitHubReleaseFeed {
    GitHubReleaseFeed::new(
        format!("{}/releases/latest", server.uri()),
        format!("{}/releases", server.uri()),
        per_page,
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn list_requests_one_page_and_keeps_android_releases() {
    let server = MockServer::start().await;
    let body = serde_json::json!([
        {
            "tag_name": "16.1.2",
            "name": "Frida 16.1.2",
            "published_at": "2023-06-01T10:00:00Z",
            "prerelease": false,
            "assets": [
                { "name": "frida-server-16.1.2-android-arm64.xz", "browser_download_url": "https://dl/arm64.xz" }
            ]
        },
        {
            "tag_name": "16.1.1",
            "name": "",
            "published_at": null,
            "prerelease": true,
            "assets": [
                { "name": "frida-gadget-16.1.1-ios-universal.dylib.xz", "browser_download_url": "https://dl/gadget.xz" }
            ]
        }
    ]);
    Mock::given(method("GET"))
        .and(path("/releases"))
        .and(query_param("per_page", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let releases = feed(&server, 10).list().await.unwrap();

    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag_name, "16.1.2");
    assert_eq!(releases[0].assets.len(), 1);
}

#[tokio::test]
async fn latest_maps_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/latest"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = feed(&server, 10).latest().await.unwrap_err();

    assert!(
        matches!(&err, InstallerError::Http { status: 403, url } if url.ends_with("/releases/latest")),
        "{err:?}"
    );
    assert_eq!(err.category(), "transfer");
}

#[tokio::test]
async fn latest_rejects_unusable_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
        .mount(&server)
        .await;

    let err = feed(&server, 10).latest().await.unwrap_err();

    assert_eq!(err.category(), "transfer");
}

#[tokio::test]
async fn slow_response_outlasts_the_connect_timeout() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "tag_name": "16.1.2",
        "name": "Frida 16.1.2",
        "published_at": null,
        "prerelease": false,
        "assets": []
    });
    Mock::given(method("GET"))
        .and(path("/releases/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body)
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;
    let feed = GitHubReleaseFeed::new(
        format!("{}/releases/latest", server.uri()),
        format!("{}/releases", server.uri()),
        10,
        Duration::from_millis(100),
    )
    .unwrap();

    let release = feed.latest().await.unwrap();

    assert_eq!(release.tag_name, "16.1.2");
}
