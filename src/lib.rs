//! loraserve: a chat-serving backend that can switch between a hosted LLM
//! and a local quantized model, with on-demand LoRA fine-tuning of the
//! local one.

pub mod config;
pub mod error;
pub mod lora;
pub mod runtime;
pub mod server;
pub mod training;

pub use config::{ProviderKind, RuntimeConfig, Settings};
pub use error::{Result, RuntimeError};
pub use runtime::{
    AdapterState, GenerationOptions, ModelRuntime, ModelRuntimeExt, RuntimeRegistry, RuntimeState,
    Slot,
};
pub use training::{TrainingDriver, TrainingParams, TrainingReport};
