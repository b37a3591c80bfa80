use std::sync::Arc;

use crate::config::Config;
use crate::jobs::JobManager;
use crate::observability::Metrics;
use crate::pipeline::Pipeline;
use crate::queue::TaskBroker;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<JobManager>,
    pub broker: Arc<TaskBroker>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, pipeline: &Pipeline) -> Self {
        Self {
            config: Arc::new(config),
            manager: pipeline.manager.clone(),
            broker: pipeline.broker.clone(),
            metrics: pipeline.metrics.clone(),
        }
    }
}
