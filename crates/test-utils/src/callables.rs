//! Scripted task callables for engine tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use dagflow::exec::callable::{TaskCallable, TaskOutput, task_fn};
use dagflow::exec::context::TaskContext;
use serde_json::Value;

/// Succeeds with `value`.
pub fn value_task(value: Value) -> Arc<dyn TaskCallable> {
    task_fn(move |_ctx| {
        let value = value.clone();
        async move { anyhow::Ok(TaskOutput::Value(value)) }
    })
}

/// Always fails with `message`.
pub fn failing_task(message: &str) -> Arc<dyn TaskCallable> {
    let message = message.to_string();
    task_fn(move |_ctx| {
        let message = message.clone();
        async move { Err::<TaskOutput, _>(anyhow::anyhow!(message)) }
    })
}

/// Branch task that always picks `label`.
pub fn branch_to(label: &str) -> Arc<dyn TaskCallable> {
    let label = label.to_string();
    task_fn(move |_ctx| {
        let label = label.clone();
        async move { anyhow::Ok(TaskOutput::branch(label)) }
    })
}

/// Fails the first `failures` calls, then succeeds with `value`.
///
/// The returned counter tracks how many times the task was called.
pub fn flaky_task(failures: u32, value: Value) -> (Arc<dyn TaskCallable>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let callable = task_fn(move |_ctx| {
        let counter = Arc::clone(&counter);
        let value = value.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                anyhow::bail!("transient failure #{n}");
            }
            Ok(TaskOutput::Value(value))
        }
    });
    (callable, calls)
}

/// Records every context it is called with, then succeeds with `null`.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<TaskContext>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callable(&self) -> Arc<dyn TaskCallable> {
        let seen = Arc::clone(&self.seen);
        task_fn(move |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(ctx);
                anyhow::Ok(TaskOutput::none())
            }
        })
    }

    pub fn contexts(&self) -> Vec<TaskContext> {
        self.seen.lock().unwrap().clone()
    }
}
