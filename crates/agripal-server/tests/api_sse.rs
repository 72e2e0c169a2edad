use agripal_broker::{LinkState, LinkStatus};
use agripal_server::hub::{DistributionHub, HubSettings};
use agripal_server::{app, AppState};
use agripal_store::TelemetryStore;
use agripal_types::DeviceSample;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Reads chunks until the accumulated body contains `needle`.
async fn read_until(response: &mut reqwest::Response, buffer: &mut String, needle: &str) {
    while !buffer.contains(needle) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for SSE data")
            .expect("failed to read chunk")
            .expect("stream closed");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

#[tokio::test]
async fn test_sse_sensor_stream() {
    let hub = DistributionHub::new(TelemetryStore::new(), HubSettings::default());
    hub.publish(
        "agripal/F1/D1",
        DeviceSample::new("F1", "D1").with_metric("soil_moisture", 40),
    );
    let state = AppState::new(hub.clone(), LinkStatus::fixed(LinkState::Connected));

    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_url = format!("http://{}", addr);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = reqwest::Client::new();
    let mut response = client
        .get(format!("{}/events/sensors", server_url))
        .send()
        .await
        .expect("Failed to connect to SSE stream");
    assert!(response.status().is_success());

    let mut body = String::new();
    read_until(&mut response, &mut body, "\n\n").await;
    assert!(body.starts_with("event: initial-data"), "got {body:?}");
    assert!(body.contains("\"soil_moisture\":40"));
    body.clear();

    hub.publish(
        "agripal/F1/D2",
        DeviceSample::new("F1", "D2").with_metric("soil_moisture", 55),
    );

    read_until(&mut response, &mut body, "\n\n").await;
    assert!(body.starts_with("event: sensor-data"), "got {body:?}");
    assert!(body.contains("\"topic\":\"agripal/F1/D2\""));
    assert!(body.contains("\"device_id\":\"D2\""));
    assert!(body.contains("receivedAt"));
}
