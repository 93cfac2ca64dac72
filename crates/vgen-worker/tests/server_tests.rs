//! HTTP surface driven through the router without binding a socket.

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{track, Harness, CDN};
use vgen_worker::{create_router, AppState};

fn router(h: &Harness) -> Router {
    create_router(AppState::new(h.handler.clone(), None), 1024 * 1024)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_postprocess_error_field_wins() {
    let h = Harness::builder().build();

    let (status, body) = call(
        router(&h),
        post("/postprocess", json!({"status": "error", "error": "decode failed", "message": "x"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"error": "decode failed"}));
}

#[tokio::test]
async fn test_postprocess_falls_back_to_message() {
    let h = Harness::builder().build();

    let (_, body) = call(
        router(&h),
        post("/postprocess", json!({"status": "FAILED", "message": "fallback msg"})),
    )
    .await;

    assert_eq!(body, json!({"error": "fallback msg"}));
}

#[tokio::test]
async fn test_postprocess_success_is_single_item_list() {
    let h = Harness::builder().build();

    let (_, body) = call(
        router(&h),
        post(
            "/postprocess",
            json!({
                "status": "COMPLETED",
                "output": {
                    "status": "success",
                    "video": {
                        "filename": "vgen_a.mp4",
                        "download_url": "https://cdn/v.mp4",
                        "randomization": "1:00:lofi"
                    },
                    "processing_time": 2.5
                }
            }),
        ),
    )
    .await;

    let items = body.as_array().expect("list output");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["filename"], "vgen_a.mp4");
    assert_eq!(items[0]["video_url"], "https://cdn/v.mp4");
    assert_eq!(items[0]["randomization"], "1:00:lofi");
    assert_eq!(items[0]["processing_time"], 2.5);
}

#[tokio::test]
async fn test_run_envelope_returns_video_block() {
    let h = Harness::builder().tracks(vec![track(1, "lofi")]).build();

    let (status, body) = call(
        router(&h),
        post("/run", json!({"id": "req-7", "input": {"source": "a.mp4", "overlay_audio": true}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let filename = body["video"]["filename"].as_str().unwrap();
    assert!(filename.starts_with("vgen_req-7_"), "{}", filename);
    assert_eq!(body["video"]["download_url"], format!("{}/videos/{}", CDN, filename));
    assert!(body["video"]["randomization"].as_str().unwrap().starts_with("1:"));
}

#[tokio::test]
async fn test_run_failure_round_trips_through_postprocess() {
    let h = Harness::builder().engine_fails().build();

    let request = post("/runsync", json!({"input": {"source": "a.mp4"}}));
    let (_, upstream) = call(router(&h), request).await;
    assert_eq!(upstream["status"], "error");

    let (_, output) = call(router(&h), post("/postprocess", upstream)).await;
    assert_eq!(output, json!({"error": "Inference failed: accelerator fault"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_answers_while_job_holds_accelerator() {
    let h = Harness::builder()
        .frames(3)
        .inference_delay(Duration::from_millis(200))
        .build();
    let app = router(&h);

    let job = tokio::spawn(call(app.clone(), post("/run", json!({"source": "a.mp4"}))));
    while !h.accelerator.is_busy() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = tokio::time::timeout(Duration::from_millis(150), call(app, get("/health")))
        .await
        .expect("health blocked behind the job");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (_, run) = job.await.unwrap();
    assert_eq!(run["status"], "success");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_request_releases_in_flight_count() {
    let h = Harness::builder()
        .frames(3)
        .inference_delay(Duration::from_millis(200))
        .build();
    let state = AppState::new(h.handler.clone(), None);
    let app = create_router(state.clone(), 1024 * 1024);

    let pending = tokio::spawn(call(app, post("/runsync", json!({"source": "a.mp4"}))));
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.jobs_in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job never started");
    assert_eq!(state.jobs_in_flight(), 1);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert_eq!(state.jobs_in_flight(), 0);
}

#[tokio::test]
async fn test_ready_reports_dependency_checks() {
    let h = Harness::builder().build();

    let (_, body) = call(router(&h), get("/ready")).await;

    assert_eq!(body["checks"]["catalog"]["status"], "ok");
    assert_eq!(body["checks"]["catalog"]["detail"], "counting");
    assert_eq!(body["checks"]["storage"]["status"], "ok");
    assert_eq!(body["checks"]["storage"]["detail"], "local");
    assert_eq!(body["checks"]["model"]["detail"], "stub-matte");
}

#[tokio::test]
async fn test_metrics_route_absent_when_disabled() {
    let h = Harness::builder().build();

    let response = router(&h).oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
