//! Frozen causal language-model backbones.
//!
//! The adapter and local runtimes drive a [`CausalBackbone`] rather than a
//! concrete model type so tests can substitute a tiny deterministic model.
//! Production loading goes through [`GgufLoader`], which reads quantized
//! llama-family weights from a GGUF file.

use std::fs::File;
use std::path::Path;

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_llama::ModelWeights;
use tokenizers::Tokenizer;

use crate::config::DeviceKind;
use crate::error::{Result, RuntimeError};

/// A frozen autoregressive model: token embeddings in, next-token logits out.
///
/// `forward` maintains internal key/value caches; passing `index_pos == 0`
/// starts a new sequence. Outputs carry no gradient, the backbone is never
/// trained.
pub trait CausalBackbone: Send {
    fn device(&self) -> &Device;

    fn hidden_size(&self) -> usize;

    /// Embedding vectors for a token sequence, shape `[len, hidden]`, f32.
    fn embed(&self, tokens: &[u32]) -> Result<Tensor>;

    /// Project hidden-size vectors through the output head, `[.., hidden]`
    /// to `[.., vocab]`.
    fn head_project(&self, hidden: &Tensor) -> Result<Tensor>;

    /// Next-token logits for the last position of `tokens`, shape
    /// `[vocab]`, f32.
    fn forward(&mut self, tokens: &[u32], index_pos: usize) -> Result<Tensor>;
}

/// Maps a configured device preference onto what the build actually has.
pub fn resolve_device(kind: DeviceKind) -> Result<Device> {
    match kind {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Cuda => Device::new_cuda(0).map_err(RuntimeError::load),
        DeviceKind::Auto => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0).map_err(RuntimeError::load)
            } else {
                Ok(Device::Cpu)
            }
        }
    }
}

/// Loads backbones and tokenizers from disk. Implemented by [`GgufLoader`]
/// in production and by in-memory toys in tests.
pub trait ModelLoader: Send + Sync {
    fn load_backbone(&self, weights: &Path, device: &Device) -> Result<Box<dyn CausalBackbone>>;

    fn load_tokenizer(&self, path: &Path) -> Result<Tokenizer>;
}

/// GGUF-backed llama-family loader.
#[derive(Debug, Default)]
pub struct GgufLoader;

impl ModelLoader for GgufLoader {
    fn load_backbone(&self, weights: &Path, device: &Device) -> Result<Box<dyn CausalBackbone>> {
        Ok(Box::new(GgufBackbone::open(weights, device)?))
    }

    fn load_tokenizer(&self, path: &Path) -> Result<Tokenizer> {
        Tokenizer::from_file(path).map_err(|e| RuntimeError::Load(anyhow::anyhow!(e)))
    }
}

/// Quantized llama weights plus dequantized embedding and head matrices.
///
/// The embedding and head tensors are kept in f32 so adapter deltas can be
/// computed against them; the transformer stack itself stays quantized.
pub struct GgufBackbone {
    weights: ModelWeights,
    embeddings: Tensor,
    head: Tensor,
    device: Device,
    hidden_size: usize,
}

impl GgufBackbone {
    pub fn open(path: &Path, device: &Device) -> Result<Self> {
        let mut file = File::open(path).map_err(RuntimeError::load)?;
        let content = gguf_file::Content::read(&mut file).map_err(RuntimeError::load)?;

        let embeddings = content
            .tensor(&mut file, "token_embd.weight", device)
            .map_err(RuntimeError::load)?
            .dequantize(device)
            .map_err(RuntimeError::load)?
            .to_dtype(candle_core::DType::F32)
            .map_err(RuntimeError::load)?;

        // Some exports tie the output head to the embedding matrix and omit
        // the tensor entirely.
        let head = if content.tensor_infos.contains_key("output.weight") {
            content
                .tensor(&mut file, "output.weight", device)
                .map_err(RuntimeError::load)?
                .dequantize(device)
                .map_err(RuntimeError::load)?
                .to_dtype(candle_core::DType::F32)
                .map_err(RuntimeError::load)?
        } else {
            embeddings.clone()
        };

        let (_vocab_size, hidden_size) = embeddings.dims2().map_err(RuntimeError::load)?;

        let weights =
            ModelWeights::from_gguf(content, &mut file, device).map_err(RuntimeError::load)?;

        Ok(Self {
            weights,
            embeddings,
            head,
            device: device.clone(),
            hidden_size,
        })
    }
}

impl CausalBackbone for GgufBackbone {
    fn device(&self) -> &Device {
        &self.device
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn embed(&self, tokens: &[u32]) -> Result<Tensor> {
        let ids = Tensor::new(tokens, &self.device).map_err(RuntimeError::generation)?;
        self.embeddings
            .index_select(&ids, 0)
            .map_err(RuntimeError::generation)
    }

    fn head_project(&self, hidden: &Tensor) -> Result<Tensor> {
        let head_t = self.head.t().map_err(RuntimeError::generation)?;
        hidden.matmul(&head_t).map_err(RuntimeError::generation)
    }

    fn forward(&mut self, tokens: &[u32], index_pos: usize) -> Result<Tensor> {
        let input = Tensor::new(tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(RuntimeError::generation)?;
        let logits = self
            .weights
            .forward(&input, index_pos)
            .map_err(RuntimeError::generation)?;
        logits
            .squeeze(0)
            .and_then(|t| t.to_dtype(candle_core::DType::F32))
            .map_err(RuntimeError::generation)
    }
}
