// src/pipeline.rs

//! The "train, then deploy if good enough" reference pipeline.
//!
//! ```text
//! start >> data_quality >> train_and_evaluate >> is_deployable >> [deploy, notify] >> end
//! ```
//!
//! `is_deployable` picks `deploy` when the RMSE reported by
//! `train_and_evaluate` is below the threshold and `notify` otherwise. `end`
//! joins both sides with `none_failed_or_skipped`, so the run succeeds
//! whichever side was taken, and fails when anything upstream failed.
//!
//! The heavy lifting is delegated to collaborator traits so the graph can be
//! run against real services or test doubles.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::dag::{Dag, GraphBuilder, TaskSpec};
use crate::errors::Result;
use crate::exec::callable::{TaskOutput, empty_task, task_fn};
use crate::exec::context::{RunConfig, TaskContext};
use crate::exec::retry::RetryPolicy;
use crate::types::TriggerRule;

pub const START: &str = "start";
pub const DATA_QUALITY: &str = "data_quality";
pub const TRAIN_AND_EVALUATE: &str = "train_and_evaluate";
pub const IS_DEPLOYABLE: &str = "is_deployable";
pub const DEPLOY: &str = "deploy";
pub const NOTIFY: &str = "notify";
pub const END: &str = "end";

/// Message handed to `notify` when the model is not deployed.
pub const NOT_DEPLOYED: &str = "Not deployed";

/// Outcome of a dataset validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub success: bool,
    pub details: Value,
}

/// Where the train and test splits of a vendor's dataset live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocations {
    pub train: String,
    pub test: String,
}

impl DatasetLocations {
    /// `s3://<bucket>/work_zone/data_science_project/datasets/<vendor>/{train,test}.parquet`
    pub fn for_vendor(bucket: &str, vendor: &str) -> Self {
        let base = format!("s3://{bucket}/work_zone/data_science_project/datasets/{vendor}");
        Self {
            train: format!("{base}/train.parquet"),
            test: format!("{base}/test.parquet"),
        }
    }
}

/// Checks a dataset against its expectations.
pub trait DataValidator: Send + Sync {
    fn validate(&self, dataset: &str) -> anyhow::Result<ValidationReport>;
}

/// Fits a model on the train split and returns its RMSE on the test split.
pub trait ModelTrainer: Send + Sync {
    fn train_and_evaluate(&self, datasets: &DatasetLocations) -> anyhow::Result<f64>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> anyhow::Result<()>;
}

pub trait Deployer: Send + Sync {
    fn deploy(&self, vendor: &str) -> anyhow::Result<()>;
}

/// Notifier that only logs the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) -> anyhow::Result<()> {
        info!(%message, "notification");
        Ok(())
    }
}

/// Deployer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeployer;

impl Deployer for LogDeployer {
    fn deploy(&self, vendor: &str) -> anyhow::Result<()> {
        info!(%vendor, "deploying model");
        Ok(())
    }
}

/// The services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn DataValidator>,
    pub trainer: Arc<dyn ModelTrainer>,
    pub notifier: Arc<dyn Notifier>,
    pub deployer: Arc<dyn Deployer>,
}

/// Knobs of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub bucket_name: String,
    pub vendor_name: String,
    /// Deploy only when RMSE is strictly below this.
    pub rmse_threshold: f64,
    /// Retries applied to every task.
    pub retries: u32,
    /// Fail `data_quality` when validation does not pass.
    pub fail_on_validation_failure: bool,
    pub admin_email: String,
}

impl PipelineParams {
    pub fn new(bucket_name: impl Into<String>, vendor_name: impl Into<String>) -> Self {
        let vendor_name = vendor_name.into();
        Self {
            bucket_name: bucket_name.into(),
            admin_email: format!("admin@{vendor_name}.com"),
            vendor_name,
            rmse_threshold: 500.0,
            retries: 2,
            fail_on_validation_failure: true,
        }
    }

    /// Run configuration carrying the parameters tasks read at run time.
    pub fn run_config(&self) -> RunConfig {
        RunConfig::new()
            .with_param("bucket_name", self.bucket_name.clone())
            .with_param("vendor_name", self.vendor_name.clone())
            .with_param("rmse_threshold", self.rmse_threshold.to_string())
            .with_param("admin_email", self.admin_email.clone())
    }
}

fn datasets(ctx: &TaskContext) -> Result<DatasetLocations> {
    Ok(DatasetLocations::for_vendor(
        ctx.require_param("bucket_name")?,
        ctx.require_param("vendor_name")?,
    ))
}

/// Text sent by `notify`.
pub fn notification_text(message: &str, admin_email: &str) -> String {
    format!("{message}. Notify to mail: {admin_email}")
}

/// Name of the DAG built by [`model_deploy`].
pub const DAG_NAME: &str = "model_deploy";

/// Build the model deployment DAG.
///
/// Bucket, vendor, threshold and e-mail are read from the run configuration
/// (see [`PipelineParams::run_config`]), so one DAG serves every vendor;
/// `params` supplies the retry count and the validation policy, which are
/// fixed at build time.
pub fn model_deploy(params: &PipelineParams, services: Collaborators) -> Result<Dag> {
    let retry = RetryPolicy::retries(params.retries);
    let mut b = GraphBuilder::new(DAG_NAME);

    b.add_task(TaskSpec::new(START, empty_task()).retry(retry))?;

    let validator = Arc::clone(&services.validator);
    let fail_on_validation_failure = params.fail_on_validation_failure;
    b.add_task(
        TaskSpec::new(
            DATA_QUALITY,
            task_fn(move |ctx| {
                let validator = Arc::clone(&validator);
                async move {
                    let dataset = datasets(&ctx)?.train;
                    let report = tokio::task::spawn_blocking(move || validator.validate(&dataset))
                        .await
                        .context("data validation panicked")??;
                    if !report.success && fail_on_validation_failure {
                        bail!("data quality validation failed: {}", report.details);
                    }
                    Ok(TaskOutput::Value(serde_json::to_value(&report)?))
                }
            }),
        )
        .retry(retry),
    )?;

    let trainer = Arc::clone(&services.trainer);
    b.add_task(
        TaskSpec::new(
            TRAIN_AND_EVALUATE,
            task_fn(move |ctx| {
                let trainer = Arc::clone(&trainer);
                async move {
                    let locations = datasets(&ctx)?;
                    let rmse =
                        tokio::task::spawn_blocking(move || trainer.train_and_evaluate(&locations))
                            .await
                            .context("training panicked")??;
                    if !rmse.is_finite() {
                        bail!("training produced a non-finite RMSE ({rmse})");
                    }
                    info!(run_id = ctx.run_id, rmse = %format!("{rmse:.2}"), "model evaluated");
                    Ok(TaskOutput::Value(json!(rmse)))
                }
            }),
        )
        .retry(retry),
    )?;

    b.add_task(
        TaskSpec::new(
            IS_DEPLOYABLE,
            task_fn(|ctx| async move {
                let rmse = ctx.input_f64(TRAIN_AND_EVALUATE)?;
                let threshold: f64 = ctx
                    .require_param("rmse_threshold")?
                    .parse()
                    .context("rmse_threshold is not a number")?;
                if rmse < threshold {
                    info!(run_id = ctx.run_id, rmse, threshold, "model is deployable");
                    anyhow::Ok(TaskOutput::branch(DEPLOY))
                } else {
                    info!(run_id = ctx.run_id, rmse, threshold, "model is not deployable");
                    Ok(TaskOutput::branch(NOTIFY))
                }
            }),
        )
        .branch()
        .reads(TRAIN_AND_EVALUATE)
        .retry(retry),
    )?;

    let deployer = Arc::clone(&services.deployer);
    b.add_task(
        TaskSpec::new(
            DEPLOY,
            task_fn(move |ctx| {
                let deployer = Arc::clone(&deployer);
                async move {
                    let vendor = ctx.require_param("vendor_name")?.to_string();
                    tokio::task::spawn_blocking(move || deployer.deploy(&vendor))
                        .await
                        .context("deployment panicked")??;
                    anyhow::Ok(TaskOutput::none())
                }
            }),
        )
        .retry(retry),
    )?;

    let notifier = Arc::clone(&services.notifier);
    b.add_task(
        TaskSpec::new(
            NOTIFY,
            task_fn(move |ctx| {
                let notifier = Arc::clone(&notifier);
                async move {
                    let message = ctx.arg_str("message").unwrap_or(NOT_DEPLOYED);
                    let text = notification_text(message, ctx.require_param("admin_email")?);
                    let sent = text.clone();
                    tokio::task::spawn_blocking(move || notifier.notify(&sent))
                        .await
                        .context("notification panicked")??;
                    anyhow::Ok(TaskOutput::Value(Value::String(text)))
                }
            }),
        )
        .args(json!({ "message": NOT_DEPLOYED }))
        .retry(retry),
    )?;

    b.add_task(
        TaskSpec::new(END, empty_task())
            .join(TriggerRule::NoneFailedOrSkipped)
            .retry(retry),
    )?;

    b.chain(&[START, DATA_QUALITY, TRAIN_AND_EVALUATE, IS_DEPLOYABLE])?;
    b.add_branch_edge(IS_DEPLOYABLE, DEPLOY, DEPLOY)?;
    b.add_branch_edge(IS_DEPLOYABLE, NOTIFY, NOTIFY)?;
    b.fan_in(&[DEPLOY, NOTIFY], END)?;
    b.set_end(END)?;

    b.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskKind;

    struct Never;

    impl DataValidator for Never {
        fn validate(&self, _: &str) -> anyhow::Result<ValidationReport> {
            unreachable!()
        }
    }

    impl ModelTrainer for Never {
        fn train_and_evaluate(&self, _: &DatasetLocations) -> anyhow::Result<f64> {
            unreachable!()
        }
    }

    fn services() -> Collaborators {
        Collaborators {
            validator: Arc::new(Never),
            trainer: Arc::new(Never),
            notifier: Arc::new(LogNotifier),
            deployer: Arc::new(LogDeployer),
        }
    }

    #[test]
    fn dataset_paths() {
        let loc = DatasetLocations::for_vendor("bkt", "my_place_ai");
        assert_eq!(
            loc.train,
            "s3://bkt/work_zone/data_science_project/datasets/my_place_ai/train.parquet"
        );
        assert_eq!(
            loc.test,
            "s3://bkt/work_zone/data_science_project/datasets/my_place_ai/test.parquet"
        );
    }

    #[test]
    fn graph_shape() {
        let params = PipelineParams::new("bkt", "my_place_ai");
        let dag = model_deploy(&params, services()).unwrap();

        assert_eq!(dag.len(), 7);
        assert_eq!(dag.name(), DAG_NAME);
        assert_eq!(dag.roots(), vec![START]);
        assert_eq!(dag.end_task(), Some(END));
        assert_eq!(dag.task(IS_DEPLOYABLE).map(|t| t.kind), Some(TaskKind::Branch));
        assert_eq!(
            dag.task(END).map(|t| t.kind),
            Some(TaskKind::Join(TriggerRule::NoneFailedOrSkipped))
        );
        assert_eq!(dag.task(DATA_QUALITY).map(|t| t.retry.max_retries), Some(2));
        assert_eq!(params.admin_email, "admin@my_place_ai.com");
    }

    #[test]
    fn notification_format() {
        assert_eq!(
            notification_text(NOT_DEPLOYED, "admin@my_place_ai.com"),
            "Not deployed. Notify to mail: admin@my_place_ai.com"
        );
    }
}
