//! Low-rank adaptation weights.
//!
//! The adapter is a set of rank-decomposed matrix pairs living alongside a
//! frozen quantized base model. It owns the only trainable parameters in
//! the process and knows how to persist itself as a snapshot directory
//! (safetensors weights plus a JSON manifest).

mod adapter;

pub use adapter::{AdapterVarSnapshot, LoraAdapter, LoraLayer};

/// File names making up an adapter snapshot directory.
pub const WEIGHTS_FILE: &str = "adapter_model.safetensors";
pub const MANIFEST_FILE: &str = "adapter_config.json";
