//! Registry operations against a mock REST server

use chrono::{TimeZone, Utc};
use iot2_sdk::api::{
    ApiClient, ApiError, ClientStatusFilter, DeviceCreateRequest, DeviceErrorCode, DeviceLocation,
    DeviceLog, DeviceTypeCreateRequest, DeviceUid, LogSeverity, Registry,
};
use serde_json::json;
use wiremock::matchers::{body_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry(server: &MockServer) -> Registry {
    Registry::new(ApiClient::with_credentials(&server.uri(), "a-myorg-key", "token", true).unwrap())
}

fn device_record() -> serde_json::Value {
    json!({
        "clientId": "d:myorg:pi:0001",
        "typeId": "pi",
        "deviceId": "0001",
        "deviceInfo": {"description": "kitchen", "manufacturer": "acme"},
        "metadata": {"floor": 1}
    })
}

#[tokio::test]
async fn test_get_device_by_client_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/0001"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/0002"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let devices = registry(&server).devices();
    let device = devices.get("d:myorg:pi:0001").await.unwrap().unwrap();
    assert_eq!(device.uid(), DeviceUid::new("pi", "0001"));
    assert_eq!(device.device_info.manufacturer.as_deref(), Some("acme"));
    assert_eq!(device.metadata, Some(json!({"floor": 1})));

    assert!(devices.get("d:myorg:pi:0002").await.unwrap().is_none());
    assert!(!devices.exists("d:myorg:pi:0002").await.unwrap());
}

#[tokio::test]
async fn test_unscoped_key_must_be_client_id() {
    let server = MockServer::start().await;
    let err = registry(&server).devices().get("0001").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidDeviceKey { .. }));
}

#[tokio::test]
async fn test_bulk_create_and_remove() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0002/bulk/devices/add"))
        .and(body_json(json!([
            {"typeId": "pi", "deviceId": "0001", "authToken": "secret-token"},
            {"typeId": "pi", "deviceId": "0002", "location": {"latitude": 51.5, "longitude": -0.1}}
        ])))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!([
            {"typeId": "pi", "deviceId": "0001", "success": true, "authToken": "secret-token"},
            {"typeId": "pi", "deviceId": "0002", "success": true, "authToken": "generated"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v0002/bulk/devices/remove"))
        .and(body_json(json!([{"typeId": "pi", "deviceId": "0001"}])))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!([{"success": true}])))
        .expect(1)
        .mount(&server)
        .await;

    let devices = registry(&server).devices();
    let created = devices
        .create(&[
            DeviceCreateRequest::new("pi", "0001").with_auth_token("secret-token"),
            DeviceCreateRequest::new("pi", "0002").with_location(DeviceLocation::new(51.5, -0.1)),
        ])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[1].auth_token.as_deref(), Some("generated"));

    let removed = devices
        .remove(&[DeviceUid::new("pi", "0001")])
        .await
        .unwrap();
    assert_eq!(removed, json!([{"success": true}]));
}

#[tokio::test]
async fn test_delete_device() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v0002/device/types/pi/devices/0001"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v0002/device/types/pi/devices/0009"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let devices = registry(&server).devices();
    assert!(devices.delete("d:myorg:pi:0001").await.unwrap());
    assert!(!devices.delete("d:myorg:pi:0009").await.unwrap());
}

#[tokio::test]
async fn test_device_nested_operations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v0002/device/types/pi/devices/0001/location"))
        .and(body_json(json!({"latitude": 51.5, "longitude": -0.1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "latitude": 51.5,
            "longitude": -0.1,
            "updatedDateTime": "2019-06-01T12:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/0001/mgmt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/logs/connection"))
        .and(query_param("typeId", "pi"))
        .and(query_param("deviceId", "0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"message": "Connected", "timestamp": "2019-06-01T12:00:00Z"}
        ])))
        .mount(&server)
        .await;

    let device = registry(&server)
        .devices()
        .get("d:myorg:pi:0001")
        .await
        .unwrap()
        .unwrap();

    let location = device
        .set_location(&DeviceLocation::new(51.5, -0.1))
        .await
        .unwrap();
    assert_eq!(
        location.updated_date_time,
        Some(Utc.with_ymd_and_hms(2019, 6, 1, 12, 0, 0).unwrap())
    );
    assert!(device.mgmt().await.unwrap().is_none());

    let logs = device.connection_logs().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "Connected");
}

#[tokio::test]
async fn test_device_type_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0002/device/types"))
        .and(body_json(json!({
            "id": "gw",
            "description": "Gateways",
            "classId": "Gateway"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "gw",
            "description": "Gateways",
            "classId": "Gateway"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/gw/devices/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let device_type = registry(&server)
        .device_types()
        .create(&DeviceTypeCreateRequest::gateway("gw").with_description("Gateways"))
        .await
        .unwrap();
    assert_eq!(device_type.to_string(), "[gw] Gateways");

    let devices = device_type
        .devices()
        .unwrap()
        .iter()
        .try_collect_all()
        .await
        .unwrap();
    assert!(devices.is_empty());
}

#[tokio::test]
async fn test_connection_status_find() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v0002/clientconnectionstates"))
        .and(query_param("deviceType", "pi"))
        .and(query_param("connectionStatus", "connected"))
        .and(query_param("connectedAfter", "2019-06-01T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "d:myorg:pi:0001", "connectionStatus": "connected"},
                {"id": "d:myorg:pi:0002", "connectionStatus": "connected"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let filter = ClientStatusFilter {
        type_id: Some("pi".to_string()),
        connection_status: Some("connected".to_string()),
        connected_after: Some(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap()),
        ..Default::default()
    };
    let statuses = registry(&server)
        .connection_status()
        .find(&filter)
        .try_collect_all()
        .await
        .unwrap();

    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|status| status.is_connected()));
}

#[tokio::test]
async fn test_device_diagnostic_logs() {
    let server = MockServer::start().await;
    let logs_path = "/api/v0002/device/types/pi/devices/0001/diag/logs";
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(logs_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "log1",
                "typeId": "pi",
                "deviceId": "0001",
                "message": "boot",
                "severity": 0,
                "data": "",
                "timestamp": "2019-06-01T12:00:00Z"
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{logs_path}/log1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "log1",
            "message": "boot",
            "severity": 0,
            "data": "",
            "timestamp": "2019-06-01T12:00:00Z"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{logs_path}/missing")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(logs_path))
        .and(body_json(json!({
            "message": "overheating",
            "severity": 2,
            "data": "87C",
            "timestamp": "2019-06-01T12:05:00Z"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{logs_path}/log1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(logs_path))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let device = registry(&server)
        .devices()
        .get("d:myorg:pi:0001")
        .await
        .unwrap()
        .unwrap();
    let logs = device.diag_logs().unwrap();

    let entries = logs.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id.as_deref(), Some("log1"));
    assert_eq!(entries[0].severity, LogSeverity::Info);

    let entry = logs.get("log1").await.unwrap().unwrap();
    assert_eq!(entry.message, "boot");
    assert!(logs.get("missing").await.unwrap().is_none());
    assert!(!logs.exists("missing").await.unwrap());

    logs.append(&DeviceLog::new(
        "overheating",
        LogSeverity::Error,
        "87C",
        Utc.with_ymd_and_hms(2019, 6, 1, 12, 5, 0).unwrap(),
    ))
    .await
    .unwrap();
    assert!(logs.delete("log1").await.unwrap());
    logs.clear().await.unwrap();
}

#[tokio::test]
async fn test_device_diagnostic_error_codes() {
    let server = MockServer::start().await;
    let codes_path = "/api/v0002/device/types/pi/devices/0001/diag/errorCodes";
    Mock::given(method("GET"))
        .and(path("/api/v0002/device/types/pi/devices/0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(codes_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"errorCode": 42, "timestamp": "2019-06-01T12:00:00Z"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(codes_path))
        .and(body_json(json!({"errorCode": 7, "timestamp": "2019-06-01T12:05:00Z"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(codes_path))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "message": "CUDRS0500E: clear failed"
        })))
        .mount(&server)
        .await;

    let device = registry(&server)
        .devices()
        .get("d:myorg:pi:0001")
        .await
        .unwrap()
        .unwrap();
    let codes = device.diag_error_codes().unwrap();

    let listed = codes.list().await.unwrap();
    assert_eq!(listed[0].error_code, 42);

    codes
        .append(&DeviceErrorCode::new(
            7,
            Utc.with_ymd_and_hms(2019, 6, 1, 12, 5, 0).unwrap(),
        ))
        .await
        .unwrap();

    let err = codes.clear().await.unwrap_err();
    assert!(matches!(err, ApiError::Status(_)));
}
