//! Shared fixtures: a tiny deterministic backbone and an in-memory
//! tokenizer, so the full runtime stack runs without model files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use loraserve::config::{
    AdapterConfig, DeviceKind, GenerationDefaults, LocalConfig, LoraHyperparams, RuntimeConfig,
};
use loraserve::error::{Result, RuntimeError};
use loraserve::runtime::{CausalBackbone, ModelLoader};

pub const TOY_VOCAB: usize = 16;
pub const TOY_HIDDEN: usize = 8;

/// 16-word vocabulary covering the instruction template and a few words.
const TOY_TOKENIZER_JSON: &str = r####"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "<unk>": 0,
      "</s>": 1,
      "hello": 2,
      "world": 3,
      "###": 4,
      ":": 5,
      "Instruction": 6,
      "Input": 7,
      "Response": 8,
      "say": 9,
      "hi": 10,
      "the": 11,
      "cat": 12,
      "ok": 13,
      "on": 14,
      "mat": 15
    },
    "unk_token": "<unk>"
  }
}"####;

pub fn toy_tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(TOY_TOKENIZER_JSON.as_bytes()).expect("embedded tokenizer is valid")
}

/// Deterministic embedding-only language model. Next-token logits are the
/// dot product of the last token's embedding with every row of the
/// embedding table; the output head is tied to the embeddings.
pub struct ToyBackbone {
    embeddings: Tensor,
    device: Device,
    /// Per-forward delay, for tests that need an operation to stay in
    /// flight while another thread acts.
    forward_delay: Duration,
}

impl ToyBackbone {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(forward_delay: Duration) -> Self {
        let data: Vec<f32> = (0..TOY_VOCAB * TOY_HIDDEN)
            .map(|i| ((i % 7) as f32 - 3.0) * 0.1)
            .collect();
        let embeddings = Tensor::from_vec(data, (TOY_VOCAB, TOY_HIDDEN), &Device::Cpu)
            .expect("toy embedding table");
        Self {
            embeddings,
            device: Device::Cpu,
            forward_delay,
        }
    }
}

impl CausalBackbone for ToyBackbone {
    fn device(&self) -> &Device {
        &self.device
    }

    fn hidden_size(&self) -> usize {
        TOY_HIDDEN
    }

    fn embed(&self, tokens: &[u32]) -> Result<Tensor> {
        let ids = Tensor::new(tokens, &self.device).map_err(RuntimeError::generation)?;
        self.embeddings
            .index_select(&ids, 0)
            .map_err(RuntimeError::generation)
    }

    fn head_project(&self, hidden: &Tensor) -> Result<Tensor> {
        let head_t = self.embeddings.t().map_err(RuntimeError::generation)?;
        hidden.matmul(&head_t).map_err(RuntimeError::generation)
    }

    fn forward(&mut self, tokens: &[u32], _index_pos: usize) -> Result<Tensor> {
        if !self.forward_delay.is_zero() {
            std::thread::sleep(self.forward_delay);
        }
        let last = *tokens
            .last()
            .ok_or_else(|| RuntimeError::Generation(anyhow::anyhow!("empty input")))?;
        let hidden = self.embed(&[last])?;
        self.head_project(&hidden)?
            .squeeze(0)
            .map_err(RuntimeError::generation)
    }
}

/// Loader that hands out [`ToyBackbone`]s. Weights paths containing
/// "missing" fail, for exercising load-error handling.
pub struct ToyLoader;

impl ModelLoader for ToyLoader {
    fn load_backbone(&self, weights: &Path, _device: &Device) -> Result<Box<dyn CausalBackbone>> {
        if weights.to_string_lossy().contains("missing") {
            return Err(RuntimeError::Load(anyhow::anyhow!(
                "no such file: {}",
                weights.display()
            )));
        }
        Ok(Box::new(ToyBackbone::new()))
    }

    fn load_tokenizer(&self, _path: &Path) -> Result<Tokenizer> {
        Ok(toy_tokenizer())
    }
}

/// Like [`ToyLoader`] but every forward pass sleeps, keeping generation
/// and training jobs observably in flight.
pub struct SlowLoader {
    pub forward_delay: Duration,
}

impl ModelLoader for SlowLoader {
    fn load_backbone(&self, _weights: &Path, _device: &Device) -> Result<Box<dyn CausalBackbone>> {
        Ok(Box::new(ToyBackbone::with_delay(self.forward_delay)))
    }

    fn load_tokenizer(&self, _path: &Path) -> Result<Tokenizer> {
        Ok(toy_tokenizer())
    }
}

pub fn toy_generation() -> GenerationDefaults {
    GenerationDefaults {
        max_tokens: 4,
        temperature: 0.0,
        top_p: 0.9,
        repeat_penalty: 1.0,
        repeat_last_n: 8,
    }
}

pub fn toy_lora() -> LoraHyperparams {
    LoraHyperparams {
        rank: 2,
        alpha: 4.0,
        dropout: 0.0,
        target_modules: vec!["q_proj".to_string()],
    }
}

pub fn adapter_config(adapter_path: Option<PathBuf>) -> AdapterConfig {
    AdapterConfig {
        base_weights: PathBuf::from("toy.gguf"),
        tokenizer: PathBuf::from("toy-tokenizer.json"),
        adapter_path,
        device: DeviceKind::Cpu,
        max_input_tokens: 64,
        lora: toy_lora(),
        generation: toy_generation(),
    }
}

pub fn local_config() -> RuntimeConfig {
    RuntimeConfig::Local(LocalConfig {
        weights: PathBuf::from("toy.gguf"),
        tokenizer: PathBuf::from("toy-tokenizer.json"),
        device: DeviceKind::Cpu,
        generation: toy_generation(),
    })
}
