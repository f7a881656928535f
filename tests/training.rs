//! Training jobs: the optimization loop end to end, rollback on failure,
//! and the background driver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use loraserve::config::RuntimeConfig;
use loraserve::error::RuntimeError;
use loraserve::lora::{MANIFEST_FILE, WEIGHTS_FILE};
use loraserve::runtime::{
    AdapterRuntime, AdapterState, GenerationOptions, ModelRuntime, RuntimeRegistry, RuntimeState,
};
use loraserve::training::{JobStatus, TrainingDriver, TrainingExample, TrainingParams};

use common::{adapter_config, local_config, SlowLoader, ToyLoader};

fn examples() -> Vec<TrainingExample> {
    vec![
        TrainingExample {
            instruction: "say hi".into(),
            input: None,
            output: "hello world".into(),
        },
        TrainingExample {
            instruction: "say hi".into(),
            input: Some("the cat".into()),
            output: "hello".into(),
        },
        TrainingExample {
            instruction: "the cat sat".into(),
            input: None,
            output: "on the mat ok".into(),
        },
    ]
}

fn quick_params(output_dir: std::path::PathBuf) -> TrainingParams {
    TrainingParams {
        examples: examples(),
        output_dir,
        num_epochs: 1,
        batch_size: 1,
        gradient_accumulation_steps: 1,
        learning_rate: 1e-3,
        warmup_steps: 0,
        logging_steps: 1,
        save_steps: 0,
        max_seq_length: 32,
    }
}

#[test]
fn training_writes_snapshot_and_updates_adapter_state() {
    let out = tempfile::tempdir().unwrap();
    let rt = AdapterRuntime::with_loader(adapter_config(None), Arc::new(ToyLoader));
    rt.load().unwrap();
    assert_eq!(rt.adapter_state(), AdapterState::FreshAdapter);

    let report = rt.train(&quick_params(out.path().to_path_buf())).unwrap();
    assert_eq!(report.epochs, 1);
    assert!(report.steps >= 1);
    assert!(report.final_loss.is_finite());

    assert!(out.path().join(WEIGHTS_FILE).exists());
    assert!(out.path().join(MANIFEST_FILE).exists());
    assert_eq!(
        rt.adapter_state(),
        AdapterState::LoadedAdapter {
            path: out.path().to_path_buf()
        }
    );
    assert_eq!(rt.state(), RuntimeState::Ready);
}

#[test]
fn trained_weights_survive_unload_and_reload() {
    let out = tempfile::tempdir().unwrap();
    let rt = AdapterRuntime::with_loader(adapter_config(None), Arc::new(ToyLoader));
    rt.load().unwrap();
    rt.train(&quick_params(out.path().to_path_buf())).unwrap();

    rt.unload();
    assert!(!rt.is_loaded());

    rt.load().unwrap();
    assert_eq!(
        rt.adapter_state(),
        AdapterState::LoadedAdapter {
            path: out.path().to_path_buf()
        }
    );
}

#[test]
fn empty_request_is_rejected_without_state_change() {
    let out = tempfile::tempdir().unwrap();
    let rt = AdapterRuntime::with_loader(adapter_config(None), Arc::new(ToyLoader));
    rt.load().unwrap();

    let mut params = quick_params(out.path().to_path_buf());
    params.examples.clear();
    let err = rt.train(&params).unwrap_err();
    assert!(matches!(err, RuntimeError::Training(_)));
    assert_eq!(rt.adapter_state(), AdapterState::FreshAdapter);
    assert_eq!(rt.state(), RuntimeState::Ready);
}

#[test]
fn failed_job_rolls_back_adapter_state() {
    // Pointing the output directory under a regular file makes the final
    // snapshot write fail after optimizer steps have already run.
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let bad_dir = blocker.path().join("out");

    let rt = AdapterRuntime::with_loader(adapter_config(None), Arc::new(ToyLoader));
    rt.load().unwrap();

    let err = rt.train(&quick_params(bad_dir)).unwrap_err();
    assert!(matches!(err, RuntimeError::Training(_)));
    assert_eq!(rt.adapter_state(), AdapterState::FreshAdapter);
    assert_eq!(rt.state(), RuntimeState::Ready);

    // The runtime stays usable and a later job can still succeed.
    let out = tempfile::tempdir().unwrap();
    rt.train(&quick_params(out.path().to_path_buf())).unwrap();
    assert_eq!(
        rt.adapter_state(),
        AdapterState::LoadedAdapter {
            path: out.path().to_path_buf()
        }
    );
}

#[test]
fn generation_during_training_queues_and_second_train_is_refused() {
    let out = tempfile::tempdir().unwrap();
    let rt = Arc::new(AdapterRuntime::with_loader(
        adapter_config(None),
        Arc::new(SlowLoader {
            forward_delay: Duration::from_millis(5),
        }),
    ));
    rt.load().unwrap();

    let trainer = Arc::clone(&rt);
    let params = quick_params(out.path().to_path_buf());
    let job = std::thread::spawn(move || trainer.train(&params));

    // Wait until the job holds the model.
    let mut observed_training = false;
    for _ in 0..500 {
        if rt.state() == RuntimeState::Training {
            observed_training = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(observed_training, "training job never reached the model");

    // A second job is refused outright while the first is in flight.
    let second = tempfile::tempdir().unwrap();
    assert!(matches!(
        rt.train(&quick_params(second.path().to_path_buf())),
        Err(RuntimeError::Busy(_))
    ));

    // Generation queues behind the job instead of being refused, and
    // completes once the job releases the model.
    rt.generate("hello world", &GenerationOptions::default())
        .unwrap();

    let report = job.join().expect("training thread panicked").unwrap();
    assert!(report.steps >= 1);
    assert_eq!(
        rt.adapter_state(),
        AdapterState::LoadedAdapter {
            path: out.path().to_path_buf()
        }
    );
    assert_eq!(rt.state(), RuntimeState::Ready);
}

#[test]
fn train_before_load_is_not_loaded() {
    let out = tempfile::tempdir().unwrap();
    let rt = AdapterRuntime::with_loader(adapter_config(None), Arc::new(ToyLoader));
    let err = rt.train(&quick_params(out.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, RuntimeError::NotLoaded(_)));
}

fn driver_with_adapter() -> TrainingDriver {
    let registry = Arc::new(RuntimeRegistry::with_loader(
        local_config(),
        Some(RuntimeConfig::Adapter(adapter_config(None))),
        Arc::new(ToyLoader),
    ));
    TrainingDriver::new(registry)
}

#[tokio::test]
async fn driver_runs_job_to_completion() {
    let out = tempfile::tempdir().unwrap();
    let driver = driver_with_adapter();

    let id = driver.submit(quick_params(out.path().to_path_buf())).unwrap();
    assert!(driver.status(id).is_some());

    let mut status = None;
    for _ in 0..500 {
        match driver.status(id).map(|s| s.status) {
            Some(JobStatus::Completed { report }) => {
                status = Some(report);
                break;
            }
            Some(JobStatus::Failed { error }) => panic!("job failed: {error}"),
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    let report = status.expect("job did not finish in time");
    assert!(report.steps >= 1);
    assert!(out.path().join(WEIGHTS_FILE).exists());
}

#[tokio::test]
async fn driver_rejects_unsupported_and_empty_requests() {
    let registry = Arc::new(RuntimeRegistry::with_loader(
        local_config(),
        None,
        Arc::new(ToyLoader),
    ));
    let driver = TrainingDriver::new(registry);
    let out = tempfile::tempdir().unwrap();
    let err = driver
        .submit(quick_params(out.path().to_path_buf()))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TrainingUnsupported));

    let driver = driver_with_adapter();
    let mut params = quick_params(out.path().to_path_buf());
    params.examples.clear();
    let err = driver.submit(params).unwrap_err();
    assert!(matches!(err, RuntimeError::Training(_)));
    assert!(driver.list().is_empty());
}

#[test]
fn status_of_unknown_job_is_none() {
    let driver = driver_with_adapter();
    assert!(driver.status(uuid::Uuid::new_v4()).is_none());
}
