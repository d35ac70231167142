//! Bookmark pagination against a mock registry server

use iot2_sdk::api::{ApiClient, ApiError, Registry};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn device(n: usize) -> Value {
    let device_id = format!("dev{n:03}");
    json!({
        "clientId": format!("d:myorg:pi:{device_id}"),
        "typeId": "pi",
        "deviceId": device_id,
        "deviceInfo": {"description": format!("device {n}")}
    })
}

fn registry(server: &MockServer) -> Registry {
    Registry::new(ApiClient::with_credentials(&server.uri(), "a-myorg-key", "token", true).unwrap())
}

/// Serves a fixed dataset; bookmarks are the offset of the next page
struct PagedDataset {
    records: Vec<Value>,
}

impl Respond for PagedDataset {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };
        let limit: usize = param("_limit").and_then(|l| l.parse().ok()).unwrap_or(50);
        let offset: usize = param("_bookmark")
            .and_then(|b| b.parse().ok())
            .unwrap_or(0);

        let end = (offset + limit).min(self.records.len());
        let mut body = json!({"results": self.records[offset..end]});
        if end < self.records.len() {
            body["bookmark"] = json!(end.to_string());
        }
        ResponseTemplate::new(200).set_body_json(body)
    }
}

#[tokio::test]
async fn test_three_pages_three_requests() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0002/bulk/devices"))
        .and(query_param_is_missing("_bookmark"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": [device(1)], "bookmark": "b1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/bulk/devices"))
        .and(query_param("_bookmark", "b1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": [device(2)], "bookmark": "b2"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/bulk/devices"))
        .and(query_param("_bookmark", "b2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [device(3)]})))
        .expect(1)
        .mount(&server)
        .await;

    let mut devices = registry(&server).devices().iter().with_limit(1);
    let mut ids = Vec::new();
    while let Some(device) = devices.next().await {
        ids.push(device.unwrap().device_id);
    }

    assert_eq!(ids, vec!["dev001", "dev002", "dev003"]);
    assert_eq!(devices.requests(), 3);
    assert!(devices.next().await.is_none());
    assert_eq!(devices.requests(), 3);
}

#[tokio::test]
async fn test_page_size_does_not_change_results() {
    let server = MockServer::start().await;
    let records: Vec<Value> = (0..23).map(device).collect();

    Mock::given(method("GET"))
        .and(path("/api/v0002/bulk/devices"))
        .respond_with(PagedDataset {
            records: records.clone(),
        })
        .mount(&server)
        .await;

    let expected: Vec<String> = records
        .iter()
        .map(|r| r["deviceId"].as_str().unwrap().to_string())
        .collect();

    for limit in [1, 2, 5, 23, 50] {
        let devices = registry(&server)
            .devices()
            .iter()
            .with_limit(limit)
            .try_collect_all()
            .await
            .unwrap();
        let ids: Vec<String> = devices.into_iter().map(|d| d.device_id).collect();
        assert_eq!(ids, expected, "page size {limit}");
    }
}

#[tokio::test]
async fn test_first_page_without_bookmark_stops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/"))
        .and(query_param("_sort", "deviceId"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": [device(1), device(2)]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::with_credentials(&server.uri(), "a-myorg-key", "token", true).unwrap();
    let devices = iot2_sdk::api::Devices::for_type(client, "pi")
        .iter()
        .try_collect_all()
        .await
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[1].to_string(), "[d:myorg:pi:dev002] device 2");
}

#[tokio::test]
async fn test_filters_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/bulk/devices"))
        .and(query_param("deviceInfo.manufacturer", "acme"))
        .and(query_param("_sort", "typeId,deviceId"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [device(7)]})))
        .expect(1)
        .mount(&server)
        .await;

    let devices = registry(&server)
        .devices()
        .find([("deviceInfo.manufacturer", "acme")])
        .try_collect_all()
        .await
        .unwrap();
    assert_eq!(devices[0].device_id, "dev007");
}

#[tokio::test]
async fn test_server_error_surfaces_api_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "exception": {"id": "CUDHT0403E"},
            "message": "CUDHT0403E: Not authorized."
        })))
        .mount(&server)
        .await;

    let mut types = registry(&server).device_types().iter();
    let err = types.next().await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(matches!(err, ApiError::Status(_)));
    assert!(types.next().await.is_none());
}
