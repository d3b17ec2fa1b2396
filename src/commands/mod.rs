// HTTP command handlers - one file per domain
pub mod dataset;
pub mod training;

use crate::dataset::DatasetStore;
use crate::training::{JobManager, ProgressBroadcaster};
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobManager>,
    pub broadcaster: ProgressBroadcaster,
    pub datasets: DatasetStore,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        // Dataset commands
        .route("/dataset/upload", post(dataset::upload_dataset))
        .route("/dataset/delete", delete(dataset::delete_dataset))
        // Training commands
        .route("/select-arch", post(training::select_arch))
        .route("/train/start", post(training::start_training))
        .route("/train/progress", get(training::training_progress))
        .route("/train/status", get(training::training_status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process_manager::WorkerCommand;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "trainer-test-boundary";

    struct TestApp {
        _dir: tempfile::TempDir,
        app: Router,
        state: AppState,
    }

    fn test_app(script: &str) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let datasets = DatasetStore::new(dir.path().join("uploads"));
        datasets.ensure_dir().unwrap();

        let command = WorkerCommand::new("/bin/sh", vec!["-c".to_string(), script.to_string()]);
        let jobs = Arc::new(JobManager::new(command, datasets.dir().to_path_buf()));
        let broadcaster = ProgressBroadcaster::new(jobs.clone(), Duration::from_millis(20));
        let state = AppState {
            jobs,
            broadcaster,
            datasets,
        };

        TestApp {
            _dir: dir,
            app: router(state.clone(), 1024 * 1024),
            state,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = tokio::time::timeout(
            Duration::from_secs(10),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("response body did not finish in time")
        .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn select_arch(arch: &str) -> Request<Body> {
        Request::post("/select-arch")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("arch={}", arch)))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    fn upload(file_name: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"dataset\"; filename=\"{f}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = file_name,
            c = contents
        );
        Request::post("/dataset/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_select_arch_validates_name() {
        let test = test_app("exit 0");

        let (status, body) = send(&test.app, select_arch("resnet")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "selected resnet architecture");

        let (status, _) = send(&test.app, select_arch("lenet")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_without_architecture() {
        let test = test_app("exit 0");

        let (status, body) = send(&test.app, empty("POST", "/train/start")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "no architecture selected");

        let (_, body) = send(&test.app, empty("GET", "/train/status")).await;
        let snapshot: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot["status"], "idle");
    }

    #[tokio::test]
    async fn test_progress_stream_requires_running_job() {
        let test = test_app("exit 0");

        let (status, body) = send(&test.app, empty("GET", "/train/progress")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "no training in progress");
    }

    #[tokio::test]
    async fn test_training_run_streams_progress_until_complete() {
        let test = test_app(r#"cat >/dev/null; echo '{"progress":0.3}'; sleep 0.3; exit 0"#);
        send(&test.app, select_arch("resnet")).await;

        let (status, body) = send(&test.app, empty("POST", "/train/start")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "training started");

        let (status, _) = send(&test.app, empty("POST", "/train/start")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let response = test.app.clone().oneshot(empty("GET", "/train/progress")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();

        assert!(body.contains(r#"data: {"progress":0.3}"#));
        assert_eq!(body.matches("event: complete").count(), 1);
        assert!(body.trim_end().ends_with('}'));

        let (_, body) = send(&test.app, empty("GET", "/train/status")).await;
        let snapshot: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_failed_run_ends_stream_with_failed_event() {
        let test = test_app("cat >/dev/null; sleep 0.1; exit 4");
        send(&test.app, select_arch("vgg")).await;
        send(&test.app, empty("POST", "/train/start")).await;

        let (status, body) = send(&test.app, empty("GET", "/train/progress")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("event: failed"));
        assert!(body.contains(r#""exit_code":4"#));
        assert!(!body.contains("event: complete"));
    }

    #[tokio::test]
    async fn test_dataset_delete_rejected_while_training() {
        let test = test_app("cat >/dev/null; sleep 0.3; exit 0");
        let (status, _) = send(&test.app, upload("iris.csv", "a,b\n1,2")).await;
        assert_eq!(status, StatusCode::OK);

        send(&test.app, select_arch("alexnet")).await;
        send(&test.app, empty("POST", "/train/start")).await;

        let (status, _) = send(&test.app, empty("DELETE", "/dataset/delete")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!test.state.datasets.is_empty().unwrap());
        assert_eq!(
            test.state.jobs.snapshot().status,
            crate::models::JobStatus::Running
        );

        // Let the run finish, then the delete goes through and resets the job
        send(&test.app, empty("GET", "/train/progress")).await;
        let (status, body) = send(&test.app, empty("DELETE", "/dataset/delete")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("deleted iris_"));
        let snapshot = test.state.jobs.snapshot();
        assert_eq!(snapshot.status, crate::models::JobStatus::Idle);
        assert_eq!(snapshot.architecture, None);
    }

    #[tokio::test]
    async fn test_empty_dataset_delete_still_rejected_while_training() {
        let test = test_app("cat >/dev/null; sleep 0.3; exit 0");
        send(&test.app, select_arch("resnet")).await;
        let (status, _) = send(&test.app, empty("POST", "/train/start")).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(&test.app, empty("DELETE", "/dataset/delete")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "training is running, dataset cannot be cleared");
        let snapshot = test.state.jobs.snapshot();
        assert_eq!(snapshot.status, crate::models::JobStatus::Running);
        assert_eq!(snapshot.architecture, Some(crate::models::Architecture::ResNet));

        send(&test.app, empty("GET", "/train/progress")).await;
    }

    #[tokio::test]
    async fn test_empty_dataset_delete_resets_selection_when_idle() {
        let test = test_app("exit 0");
        send(&test.app, select_arch("vgg")).await;

        let (status, body) = send(&test.app, empty("DELETE", "/dataset/delete")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "nothing to delete");
        assert_eq!(test.state.jobs.snapshot().architecture, None);
    }

    #[tokio::test]
    async fn test_out_of_range_progress_is_not_streamed() {
        let test = test_app(
            r#"cat >/dev/null; echo '{"progress":50}'; echo '{"progress":-3}'; sleep 0.2; exit 0"#,
        );
        send(&test.app, select_arch("resnet")).await;
        send(&test.app, empty("POST", "/train/start")).await;

        let (status, body) = send(&test.app, empty("GET", "/train/progress")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("-3"));
        assert!(!body.contains("50"));
        assert_eq!(body.matches("event: complete").count(), 1);

        let (_, body) = send(&test.app, empty("GET", "/train/status")).await;
        let snapshot: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["progress"], 0.0);
    }

    #[tokio::test]
    async fn test_dataset_upload_rules() {
        let test = test_app("exit 0");

        let (status, body) = send(&test.app, empty("DELETE", "/dataset/delete")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "nothing to delete");

        let (status, _) = send(&test.app, upload("model.pt", "weights")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&test.app, upload("iris.csv", "a,b\n1,2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "successfully uploaded iris.csv");

        let (status, body) = send(&test.app, upload("other.csv", "c,d")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "dataset already uploaded");
    }
}
