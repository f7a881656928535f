use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::config::LoraHyperparams;
use crate::error::{Result, RuntimeError};

use super::{MANIFEST_FILE, WEIGHTS_FILE};

/// One rank-decomposed pair. `a` is `[hidden, rank]`, `b` is `[rank, hidden]`.
/// `b` starts at zero so a fresh adapter contributes nothing.
pub struct LoraLayer {
    pub a: Var,
    pub b: Var,
}

/// Detached copies of every adapter parameter, used to roll back a failed
/// training job.
pub struct AdapterVarSnapshot {
    tensors: BTreeMap<String, (Tensor, Tensor)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AdapterManifest {
    rank: usize,
    alpha: f64,
    dropout: f32,
    hidden_size: usize,
    target_modules: Vec<String>,
}

/// The trainable low-rank weights, keyed by target module name.
pub struct LoraAdapter {
    layers: BTreeMap<String, LoraLayer>,
    rank: usize,
    alpha: f64,
    dropout: f32,
    hidden_size: usize,
}

impl LoraAdapter {
    /// Freshly-initialized adapter: `a` drawn from N(0, 0.02), `b` zeroed.
    pub fn fresh(hyper: &LoraHyperparams, hidden_size: usize, device: &Device) -> Result<Self> {
        let mut layers = BTreeMap::new();
        for name in &hyper.target_modules {
            let a = Var::randn(0f32, 0.02, (hidden_size, hyper.rank), device)
                .map_err(RuntimeError::load)?;
            let b = Var::zeros((hyper.rank, hidden_size), DType::F32, device)
                .map_err(RuntimeError::load)?;
            layers.insert(name.clone(), LoraLayer { a, b });
        }
        Ok(Self {
            layers,
            rank: hyper.rank,
            alpha: hyper.alpha,
            dropout: hyper.dropout,
            hidden_size,
        })
    }

    /// Restore an adapter from a snapshot directory. The directory must
    /// contain both the weights file and its manifest; anything else is
    /// reported as a missing adapter rather than silently replaced.
    pub fn restore(dir: &Path, device: &Device) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let weights_path = dir.join(WEIGHTS_FILE);

        let not_found = |reason: String| RuntimeError::AdapterNotFound {
            path: dir.to_path_buf(),
            reason,
        };

        let manifest_raw = fs::read_to_string(&manifest_path)
            .map_err(|e| not_found(format!("cannot read {MANIFEST_FILE}: {e}")))?;
        let manifest: AdapterManifest = serde_json::from_str(&manifest_raw)
            .map_err(|e| not_found(format!("invalid {MANIFEST_FILE}: {e}")))?;

        let tensors = candle_core::safetensors::load(&weights_path, device)
            .map_err(|e| not_found(format!("cannot read {WEIGHTS_FILE}: {e}")))?;

        let mut layers = BTreeMap::new();
        for name in &manifest.target_modules {
            let a = tensors
                .get(&format!("{name}.lora_a"))
                .ok_or_else(|| not_found(format!("missing tensor {name}.lora_a")))?;
            let b = tensors
                .get(&format!("{name}.lora_b"))
                .ok_or_else(|| not_found(format!("missing tensor {name}.lora_b")))?;
            let a = Var::from_tensor(a).map_err(RuntimeError::load)?;
            let b = Var::from_tensor(b).map_err(RuntimeError::load)?;
            layers.insert(name.clone(), LoraLayer { a, b });
        }

        Ok(Self {
            layers,
            rank: manifest.rank,
            alpha: manifest.alpha,
            dropout: manifest.dropout,
            hidden_size: manifest.hidden_size,
        })
    }

    /// Write the adapter as a snapshot directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(RuntimeError::training)?;

        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for (name, layer) in &self.layers {
            tensors.insert(format!("{name}.lora_a"), layer.a.as_tensor().clone());
            tensors.insert(format!("{name}.lora_b"), layer.b.as_tensor().clone());
        }
        candle_core::safetensors::save(&tensors, dir.join(WEIGHTS_FILE))
            .map_err(RuntimeError::training)?;

        let manifest = AdapterManifest {
            rank: self.rank,
            alpha: self.alpha,
            dropout: self.dropout,
            hidden_size: self.hidden_size,
            target_modules: self.layers.keys().cloned().collect(),
        };
        let raw = serde_json::to_string_pretty(&manifest).map_err(RuntimeError::training)?;
        fs::write(dir.join(MANIFEST_FILE), raw).map_err(RuntimeError::training)?;
        Ok(())
    }

    /// Low-rank correction for hidden states `x` of shape `[.., hidden]`.
    /// During training, dropout is applied on the rank-space activations.
    pub fn delta(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        let scale = self.alpha / self.rank as f64;
        let mut acc: Option<Tensor> = None;
        for layer in self.layers.values() {
            let mut h = x.matmul(layer.a.as_tensor()).map_err(RuntimeError::generation)?;
            if training && self.dropout > 0.0 {
                h = candle_nn::ops::dropout(&h, self.dropout).map_err(RuntimeError::generation)?;
            }
            let h = h
                .matmul(layer.b.as_tensor())
                .and_then(|t| t.affine(scale, 0.0))
                .map_err(RuntimeError::generation)?;
            acc = Some(match acc {
                Some(prev) => (&prev + &h).map_err(RuntimeError::generation)?,
                None => h,
            });
        }
        acc.ok_or_else(|| RuntimeError::Generation(anyhow::anyhow!("adapter has no layers")))
    }

    /// All trainable parameters, for the optimizer.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.layers
            .values()
            .flat_map(|l| [l.a.clone(), l.b.clone()])
            .collect()
    }

    /// Detached copies of the current parameters.
    pub fn snapshot(&self) -> Result<AdapterVarSnapshot> {
        let mut tensors = BTreeMap::new();
        for (name, layer) in &self.layers {
            let a = layer.a.as_tensor().copy().map_err(RuntimeError::training)?;
            let b = layer.b.as_tensor().copy().map_err(RuntimeError::training)?;
            tensors.insert(name.clone(), (a, b));
        }
        Ok(AdapterVarSnapshot { tensors })
    }

    /// Overwrite the parameters with a previously-taken snapshot.
    pub fn restore_snapshot(&self, snapshot: &AdapterVarSnapshot) -> Result<()> {
        for (name, layer) in &self.layers {
            let (a, b) = snapshot
                .tensors
                .get(name)
                .ok_or_else(|| RuntimeError::training(anyhow::anyhow!("snapshot missing {name}")))?;
            layer.a.set(a).map_err(RuntimeError::training)?;
            layer.b.set(b).map_err(RuntimeError::training)?;
        }
        Ok(())
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}
