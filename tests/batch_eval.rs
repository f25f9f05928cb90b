use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use toxflow::config::Settings;
use toxflow::evaluate::{BatchEvaluator, HttpPredictionClient, RowOutcome};
use toxflow::model::{ForestParams, SchemaCheck};
use toxflow::serve::{serve, PredictionService};
use toxflow::stages::{Preprocessor, TrainOutcome, Trainer};
use toxflow::store::{ArtifactStore, MemoryArtifactStore, Namespace};

const TRAINING: &str = "f1,f2,Label\n\
1.0,9.0,0\n1.5,8.5,0\n0.5,9.5,0\n1.2,8.8,0\n\
9.0,1.0,1\n8.5,1.5,1\n9.5,0.5,1\n8.8,1.2,1\n";

/// Labels as a pandas export would write them; the fourth row is
/// deliberately mislabeled and the last one has no ground truth.
const HOLDOUT: &str = "SMILES,f1,f2,Label\n\
CCO,1.1,9.1,0.0\n\
c1ccccc1,9.1,0.9,1.0\n\
CCN,0.9,8.9,0\n\
CCCl,9.2,1.1,0\n\
c1ccncc1,8.7,1.3,1\n\
CC,1.0,9.0,\n";

/// Raw upload with a categorical descriptor and one incomplete row.
const CATEGORICAL: &str = "SMILES,MolWt,Ring,Label\n\
CCO,46.07,none,0\n\
c1ccccc1,78.11,aromatic,1\n\
C,,none,0\n\
CCN,45.08,aliphatic,0\n\
c1ccncc1,79.1,aromatic,1\n\
c1ccc(Cl)cc1,112.56,aromatic,1\n\
CCCC,58.12,aliphatic,0\n";

async fn start_server() -> (SocketAddr, CancellationToken) {
    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let dataset = store
        .put(Namespace::Processed, "train.csv", TRAINING.as_bytes())
        .expect("put dataset");
    Trainer::new(store.clone(), "Label", "model.bin", params())
        .run(&dataset)
        .expect("train");
    serve_model(store).await
}

fn params() -> ForestParams {
    ForestParams {
        n_trees: 25,
        ..ForestParams::default()
    }
}

async fn serve_model(store: Arc<dyn ArtifactStore>) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let shutdown = CancellationToken::new();
    let service = PredictionService::new(store, "model.bin", SchemaCheck::Strict);
    tokio::spawn(serve(listener, service, shutdown.clone()));
    (addr, shutdown)
}

fn csv_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write");
    file
}

fn holdout_file() -> tempfile::NamedTempFile {
    csv_file(HOLDOUT)
}

fn evaluator(endpoint: String) -> BatchEvaluator {
    let client = HttpPredictionClient::new(endpoint, Duration::from_secs(5)).expect("client");
    BatchEvaluator::new(Arc::new(client), &Settings::default())
}

#[tokio::test]
async fn scores_a_labeled_file_against_a_live_endpoint() {
    let (addr, shutdown) = start_server().await;
    let file = holdout_file();

    let report = evaluator(format!("http://{addr}/predict"))
        .evaluate_file(file.path())
        .await
        .expect("evaluate");
    shutdown.cancel();

    assert_eq!(report.rows(), 6);
    assert_eq!(report.scored(), 5);
    assert_eq!(report.correct(), 4);
    assert_eq!(report.errored(), 0);
    assert_eq!(report.accuracy(), Some(0.8));
    assert_eq!(
        report.outcomes[1],
        RowOutcome::Correct {
            expected: "1".into(),
            predicted: "1".into()
        }
    );
    assert_eq!(report.outcomes[5], RowOutcome::MissingLabel);
}

#[tokio::test]
async fn unreachable_endpoint_records_every_row_as_errored() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr")
    };
    let file = holdout_file();

    let report = evaluator(format!("http://{addr}/predict"))
        .evaluate_file(file.path())
        .await
        .expect("evaluate");

    assert_eq!(report.errored(), 5);
    assert_eq!(report.accuracy(), None);
    assert!(report.outcomes[..5]
        .iter()
        .all(|o| matches!(o, RowOutcome::ConnectionError(_))));
}

#[tokio::test]
async fn untrained_endpoint_yields_api_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let shutdown = CancellationToken::new();
    let service = PredictionService::new(
        Arc::new(MemoryArtifactStore::new()),
        "model.bin",
        SchemaCheck::Strict,
    );
    tokio::spawn(serve(listener, service, shutdown.clone()));

    let file = holdout_file();
    let report = evaluator(format!("http://{addr}/predict"))
        .evaluate_file(file.path())
        .await
        .expect("evaluate");
    shutdown.cancel();

    match &report.outcomes[0] {
        RowOutcome::ApiError { status, body } => {
            assert_eq!(*status, 500);
            assert!(body.contains("not trained"), "{body}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.scored(), 0);
}

#[tokio::test]
async fn categorical_upload_evaluates_against_its_own_model() {
    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let settings = Settings::default();
    let raw = store
        .put(Namespace::Raw, "rings.csv", CATEGORICAL.as_bytes())
        .expect("put raw");
    let processed = Preprocessor::new(store.clone(), settings.dataset.clean_options())
        .run(&raw)
        .expect("preprocess");
    let outcome = Trainer::new(store.clone(), "Label", "model.bin", params())
        .run(&processed)
        .expect("train");
    assert!(matches!(outcome, TrainOutcome::Published { .. }), "{outcome:?}");

    let (addr, shutdown) = serve_model(store).await;
    let file = csv_file(CATEGORICAL);
    let report = evaluator(format!("http://{addr}/predict"))
        .evaluate_file(file.path())
        .await
        .expect("evaluate");
    shutdown.cancel();

    assert_eq!(report.rows(), 7);
    assert_eq!(report.errored(), 0, "{:?}", report.outcomes);
    assert_eq!(report.scored(), 6);
    assert_eq!(report.outcomes[2], RowOutcome::MissingFeatures);
    assert!(report.accuracy().is_some());
}
