use std::sync::Arc;

use taskbot_core::config::{AppConfig, ConfigError};
use taskbot_core::{AssignmentRotator, DomainError, TaskFieldExtractor};
use taskbot_slack::{
    api::SlackApi,
    events::{task_dispatcher, EventProcessor},
    pipeline::{PipelineSettings, TaskPipeline},
};
use thiserror::Error;
use tracing::info;

use crate::{slack_api::HttpSlackApi, store::SheetsTaskStore};

pub struct Application {
    pub config: AppConfig,
    pub slack_api: Arc<HttpSlackApi>,
    pub processor: Arc<EventProcessor>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("assignment roster is unusable: {0}")]
    Roster(#[from] DomainError),
}

/// Wires the pipeline from an already loaded config.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        roster_size = config.pipeline.roster.len(),
        "starting application bootstrap"
    );

    let slack_api = Arc::new(HttpSlackApi::new(&config.slack).map_err(BootstrapError::HttpClient)?);
    let store = Arc::new(SheetsTaskStore::new(&config.store).map_err(BootstrapError::HttpClient)?);
    let rotator = Arc::new(AssignmentRotator::new(config.pipeline.roster.clone())?);

    let api: Arc<dyn SlackApi> = slack_api.clone();
    let pipeline = Arc::new(TaskPipeline::new(
        rotator,
        TaskFieldExtractor::default(),
        store,
        Arc::clone(&api),
        PipelineSettings::from(&config.pipeline),
    ));
    let processor = Arc::new(EventProcessor::new(task_dispatcher(pipeline), api));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        transport_mode = config.transport_mode().as_str(),
        "task pipeline wired"
    );

    Ok(Application { config, slack_api, processor })
}
