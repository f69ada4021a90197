//! Test doubles for the model deployment pipeline's collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dagflow::pipeline::{
    Collaborators, DataValidator, DatasetLocations, Deployer, ModelTrainer, Notifier,
    ValidationReport,
};
use serde_json::json;

/// Validator with a fixed verdict; records the datasets it was asked about.
#[derive(Default)]
pub struct FakeValidator {
    pub success: bool,
    pub seen: Mutex<Vec<String>>,
}

impl FakeValidator {
    pub fn passing() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }
}

impl DataValidator for FakeValidator {
    fn validate(&self, dataset: &str) -> anyhow::Result<ValidationReport> {
        self.seen.lock().unwrap().push(dataset.to_string());
        Ok(ValidationReport {
            success: self.success,
            details: json!({ "dataset": dataset, "expectations": 3 }),
        })
    }
}

/// Trainer returning a fixed RMSE, optionally failing the first calls.
pub struct FakeTrainer {
    pub rmse: f64,
    pub failures: u32,
    pub calls: AtomicU32,
    pub seen: Mutex<Vec<DatasetLocations>>,
}

impl FakeTrainer {
    pub fn new(rmse: f64) -> Self {
        Self {
            rmse,
            failures: 0,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn flaky(rmse: f64, failures: u32) -> Self {
        Self {
            failures,
            ..Self::new(rmse)
        }
    }
}

impl ModelTrainer for FakeTrainer {
    fn train_and_evaluate(&self, datasets: &DatasetLocations) -> anyhow::Result<f64> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(datasets.clone());
        if n <= self.failures {
            anyhow::bail!("training cluster unavailable (call {n})");
        }
        Ok(self.rmse)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeployer {
    pub deployed: Mutex<Vec<String>>,
}

impl Deployer for RecordingDeployer {
    fn deploy(&self, vendor: &str) -> anyhow::Result<()> {
        self.deployed.lock().unwrap().push(vendor.to_string());
        Ok(())
    }
}

/// All four doubles, kept typed so tests can inspect them afterwards.
pub struct Doubles {
    pub validator: Arc<FakeValidator>,
    pub trainer: Arc<FakeTrainer>,
    pub notifier: Arc<RecordingNotifier>,
    pub deployer: Arc<RecordingDeployer>,
}

impl Doubles {
    pub fn new(validator: FakeValidator, trainer: FakeTrainer) -> Self {
        Self {
            validator: Arc::new(validator),
            trainer: Arc::new(trainer),
            notifier: Arc::new(RecordingNotifier::default()),
            deployer: Arc::new(RecordingDeployer::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            validator: self.validator.clone(),
            trainer: self.trainer.clone(),
            notifier: self.notifier.clone(),
            deployer: self.deployer.clone(),
        }
    }
}
