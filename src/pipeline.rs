//! Event dispatcher: routes `RawUploaded` to the preprocessor and
//! `DatasetReady` to the trainer, one task per event, with retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PipelineSettings, Settings};
use crate::error::{StageError, StoreError};
use crate::events::{EventBus, PipelineEvent, Stage};
use crate::stages::{Preprocessor, TrainOutcome, Trainer};
use crate::store::{ArtifactRef, ArtifactStore, Namespace};

/// Exponential backoff between attempts of one stage on one artifact.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: Duration::from_millis(settings.backoff_ms),
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct Pipeline {
    store: Arc<dyn ArtifactStore>,
    bus: EventBus,
    preprocessor: Arc<Preprocessor>,
    trainer: Arc<Trainer>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ArtifactStore>, settings: &Settings) -> Self {
        let preprocessor = Preprocessor::new(store.clone(), settings.dataset.clean_options());
        let trainer = Trainer::new(
            store.clone(),
            settings.dataset.label_column.clone(),
            settings.training.model_key.clone(),
            settings.training.forest_params(),
        );
        Self {
            store,
            bus: EventBus::new(settings.pipeline.event_capacity),
            preprocessor: Arc::new(preprocessor),
            trainer: Arc::new(trainer),
            retry: RetryPolicy::from_settings(&settings.pipeline),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Write a raw dataset and announce it.
    pub fn ingest(&self, key: &str, bytes: &[u8]) -> Result<ArtifactRef, StoreError> {
        let raw = self.store.put(Namespace::Raw, key, bytes)?;
        log::info!("ingested {raw} ({} bytes)", bytes.len());
        self.bus.publish(PipelineEvent::RawUploaded(raw.clone()));
        Ok(raw)
    }

    /// Start dispatching. The subscription is taken before this returns, so
    /// events published afterwards are never missed.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => self.dispatch(event),
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("dispatcher fell behind, {n} events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("dispatcher stopped");
        })
    }

    fn dispatch(self: &Arc<Self>, event: PipelineEvent) {
        match event {
            PipelineEvent::RawUploaded(raw) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.preprocess(raw).await });
            }
            PipelineEvent::DatasetReady(dataset) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.train(dataset).await });
            }
            _ => {}
        }
    }

    async fn preprocess(&self, raw: ArtifactRef) {
        let stage = Arc::clone(&self.preprocessor);
        match self
            .with_retries(Stage::Preprocess, &raw, move |r| stage.run(&r))
            .await
        {
            Ok(processed) => self.bus.publish(PipelineEvent::DatasetReady(processed)),
            Err(failed) => self.bus.publish(failed),
        }
    }

    async fn train(&self, dataset: ArtifactRef) {
        let stage = Arc::clone(&self.trainer);
        let event = match self
            .with_retries(Stage::Train, &dataset, move |r| stage.run(&r))
            .await
        {
            Ok(TrainOutcome::Published {
                model,
                dataset,
                schema,
            }) => PipelineEvent::ModelPublished {
                model,
                dataset,
                schema,
            },
            Ok(TrainOutcome::Skipped { dataset, reason }) => {
                PipelineEvent::TrainingSkipped { dataset, reason }
            }
            Err(failed) => failed,
        };
        self.bus.publish(event);
    }

    /// Run a blocking stage until it succeeds or the retry budget is spent.
    /// On exhaustion returns the `StageFailed` event to publish.
    async fn with_retries<T, F>(
        &self,
        stage: Stage,
        artifact: &ArtifactRef,
        run: F,
    ) -> Result<T, PipelineEvent>
    where
        T: Send + 'static,
        F: Fn(ArtifactRef) -> Result<T, StageError> + Clone + Send + 'static,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let run = run.clone();
            let target = artifact.clone();
            let error = match tokio::task::spawn_blocking(move || run(target)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e.to_string(),
                Err(join) => format!("stage task aborted: {join}"),
            };

            if attempt >= self.retry.max_attempts {
                log::error!("{stage} gave up on {artifact} after {attempt} attempts: {error}");
                return Err(PipelineEvent::StageFailed {
                    stage,
                    artifact: artifact.clone(),
                    attempts: attempt,
                    error,
                });
            }
            let delay = self.retry.delay(attempt);
            log::warn!(
                "{stage} attempt {attempt}/{} on {artifact} failed: {error}; retrying in {delay:?}",
                self.retry.max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Collect the terminal event of every key in `keys`, using a receiver that
/// subscribed before the datasets were ingested. Keys still unresolved when
/// `timeout` elapses or the bus closes are absent from the result.
pub async fn await_outcomes(
    rx: &mut Receiver<PipelineEvent>,
    keys: &[String],
    timeout: Duration,
) -> HashMap<String, PipelineEvent> {
    let mut outcomes = HashMap::with_capacity(keys.len());
    let wait = async {
        while outcomes.len() < keys.len() {
            match rx.recv().await {
                Ok(event) if event.is_terminal() => {
                    let key = event.dataset_key().to_string();
                    if keys.contains(&key) {
                        outcomes.entry(key).or_insert(event);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => log::warn!("outcome watcher lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(timeout, wait).await.is_err() {
        log::warn!(
            "timed out after {timeout:?} with {}/{} datasets resolved",
            outcomes.len(),
            keys.len()
        );
    }
    outcomes
}
