//! Fine-tuning: dataset preparation, the optimization loop, and the
//! background job driver that exposes training over the API.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod dataset;
pub mod driver;
pub mod trainer;

pub use dataset::{format_example, tokenize_example, TrainingExample};
pub use driver::{JobSnapshot, JobStatus, TrainingDriver};
pub use trainer::LoraTrainer;

/// A complete training request: the data plus every hyperparameter the
/// optimization loop honors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    pub examples: Vec<TrainingExample>,
    /// Directory the trained adapter snapshot is written to
    pub output_dir: PathBuf,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_grad_accum")]
    pub gradient_accumulation_steps: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_warmup_steps")]
    pub warmup_steps: usize,
    #[serde(default = "default_logging_steps")]
    pub logging_steps: usize,
    #[serde(default = "default_save_steps")]
    pub save_steps: usize,
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,
}

/// Outcome of a completed training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub steps: usize,
    pub epochs: usize,
    pub final_loss: f64,
    pub output_dir: PathBuf,
}

fn default_num_epochs() -> usize {
    3
}

fn default_batch_size() -> usize {
    4
}

fn default_grad_accum() -> usize {
    4
}

fn default_learning_rate() -> f64 {
    2e-4
}

fn default_warmup_steps() -> usize {
    100
}

fn default_logging_steps() -> usize {
    10
}

fn default_save_steps() -> usize {
    500
}

fn default_max_seq_length() -> usize {
    2048
}
