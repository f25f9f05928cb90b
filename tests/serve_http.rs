use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use toxflow::model::{ForestParams, SchemaCheck};
use toxflow::serve::{build_router, PredictionResponse, PredictionService};
use toxflow::stages::{TrainOutcome, Trainer};
use toxflow::store::{ArtifactStore, MemoryArtifactStore, Namespace};

/// Class 0 sits at low f1 / high f2, class 1 the other way round.
const MIRRORED: &str = "f1,f2,Label\n\
1.0,9.0,0\n1.5,8.5,0\n0.5,9.5,0\n1.2,8.8,0\n\
9.0,1.0,1\n8.5,1.5,1\n9.5,0.5,1\n8.8,1.2,1\n";

fn store_with_model(csv: &str, n_trees: usize) -> Arc<dyn ArtifactStore> {
    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let dataset = store
        .put(Namespace::Processed, "train.csv", csv.as_bytes())
        .expect("put dataset");
    let params = ForestParams {
        n_trees,
        ..ForestParams::default()
    };
    let outcome = Trainer::new(store.clone(), "Label", "model.bin", params)
        .run(&dataset)
        .expect("training");
    assert!(matches!(outcome, TrainOutcome::Published { .. }));
    store
}

fn app(store: Arc<dyn ArtifactStore>, check: SchemaCheck) -> Router {
    build_router(PredictionService::new(store, "model.bin", check))
}

async fn post(app: Router, body: impl Into<Body>) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header("Content-Type", "application/json")
                .body(body.into())
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

fn prediction(body: &str) -> PredictionResponse {
    serde_json::from_str(body).expect("prediction json")
}

#[tokio::test]
async fn health_check_says_ok() {
    let response = app(Arc::new(MemoryArtifactStore::new()), SchemaCheck::Strict)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn malformed_body_is_a_client_error() {
    let store = store_with_model(MIRRORED, 10);
    let (status, body) = post(app(store.clone(), SchemaCheck::Strict), "{\"f1\": 1.0,").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("malformed request"), "{body}");

    let (status, _) = post(app(store, SchemaCheck::Strict), "[1.0, 9.0]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn no_model_yet_is_reported_as_not_trained() {
    let (status, body) = post(
        app(Arc::new(MemoryArtifactStore::new()), SchemaCheck::Strict),
        json!({"f1": 1.0, "f2": 2.0}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("not trained"), "{body}");
}

#[tokio::test]
async fn binary_model_predicts_a_known_class() {
    let store = store_with_model(MIRRORED, 25);
    let current = store.get(Namespace::Model, "model.bin").expect("model").reference;

    let (status, body) = post(
        app(store, SchemaCheck::Strict),
        json!({"f1": 9.2, "f2": 0.8}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let response = prediction(&body);
    assert!(["0", "1"].contains(&response.prediction.as_str()));
    assert_eq!(response.prediction, "1");
    assert_eq!(response.status, "success");
    assert!(response.message.contains(current.version.as_str()));
}

#[tokio::test]
async fn two_row_dataset_recovers_its_training_label() {
    let store = store_with_model("f1,f2,Label\n1.0,2.0,0\n5.0,9.0,1\n", 100);
    let (status, body) = post(
        app(store, SchemaCheck::Strict),
        json!({"f1": 1.0, "f2": 2.0}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(prediction(&body).prediction, "0");
}

#[tokio::test]
async fn wrong_feature_count_is_an_inference_error() {
    let store = store_with_model(MIRRORED, 10);
    for check in [SchemaCheck::Strict, SchemaCheck::Positional] {
        for body in [
            json!({"f1": 1.0}),
            json!({"f1": 1.0, "f2": 9.0, "f3": 0.0}),
        ] {
            let (status, text) = post(app(store.clone(), check), body.to_string()).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{check:?} {body}");
            assert!(text.contains("inference failed"), "{text}");
        }
    }
}

#[tokio::test]
async fn non_numeric_feature_is_an_inference_error() {
    let store = store_with_model(MIRRORED, 10);
    let (status, text) = post(
        app(store, SchemaCheck::Strict),
        json!({"f1": "one", "f2": 9.0}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(text.contains("'f1'"), "{text}");
}

#[tokio::test]
async fn strict_mode_rejects_renamed_features() {
    let store = store_with_model(MIRRORED, 10);
    let (status, text) = post(
        app(store, SchemaCheck::Strict),
        json!({"a": 1.0, "b": 9.0}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(text.contains("missing: [f1, f2]"), "{text}");
    assert!(text.contains("unexpected: [a, b]"), "{text}");
}

#[tokio::test]
async fn strict_mode_reorders_by_name() {
    let store = store_with_model(MIRRORED, 25);
    let (status, body) = post(
        app(store, SchemaCheck::Strict),
        r#"{"f2": 9.0, "f1": 1.0}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(prediction(&body).prediction, "0");
}

/// Positional matching trusts request order: swapped or renamed keys with the
/// right count still get a well-formed, possibly wrong answer.
#[tokio::test]
async fn positional_mode_silently_answers_mismatched_names() {
    let store = store_with_model(MIRRORED, 25);

    let (status, body) = post(
        app(store.clone(), SchemaCheck::Positional),
        r#"{"a": 1.0, "b": 9.0}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(prediction(&body).prediction, "0");

    // Same values as the strict reorder test, read in the wrong order.
    let (status, body) = post(
        app(store, SchemaCheck::Positional),
        r#"{"f2": 9.0, "f1": 1.0}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(prediction(&body).prediction, "1");
}

#[tokio::test]
async fn every_request_sees_the_current_model() {
    let store = store_with_model(MIRRORED, 10);
    let router = app(store.clone(), SchemaCheck::Strict);
    let (_, first) = post(router.clone(), json!({"f1": 1.0, "f2": 9.0}).to_string()).await;

    // Retrain on a dataset with a different schema; the next request must use it.
    let dataset = store
        .put(Namespace::Processed, "other.csv", b"g,Label\n1.0,0\n9.0,1\n2.0,0\n8.0,1\n")
        .expect("put dataset");
    Trainer::new(store.clone(), "Label", "model.bin", ForestParams::default())
        .run(&dataset)
        .expect("retrain");

    let (status, text) = post(router.clone(), json!({"f1": 1.0, "f2": 9.0}).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{first} then {text}");
    let (status, _) = post(router, json!({"g": 1.0}).to_string()).await;
    assert_eq!(status, StatusCode::OK);
}
