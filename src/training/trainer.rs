//! The adapter optimization loop.
//!
//! Only the adapter parameters receive gradients. Base-model logits are
//! produced position by position through the frozen backbone and detached;
//! the adapter delta is added on top, so the cross-entropy backward pass
//! reaches nothing but the low-rank pairs.

use candle_core::Tensor;
use candle_nn::loss::cross_entropy;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::lora::LoraAdapter;
use crate::runtime::CausalBackbone;

use super::dataset::tokenize_example;
use super::{TrainingParams, TrainingReport};

pub struct LoraTrainer<'a> {
    backbone: &'a mut dyn CausalBackbone,
    tokenizer: &'a Tokenizer,
    adapter: &'a LoraAdapter,
}

impl<'a> LoraTrainer<'a> {
    pub fn new(
        backbone: &'a mut dyn CausalBackbone,
        tokenizer: &'a Tokenizer,
        adapter: &'a LoraAdapter,
    ) -> Self {
        Self {
            backbone,
            tokenizer,
            adapter,
        }
    }

    pub fn run(&mut self, params: &TrainingParams) -> Result<TrainingReport> {
        if params.examples.is_empty() {
            return Err(RuntimeError::Training(anyhow::anyhow!(
                "training request contains no examples"
            )));
        }

        let mut sequences = Vec::with_capacity(params.examples.len());
        for example in &params.examples {
            let ids = tokenize_example(self.tokenizer, example, params.max_seq_length)?;
            // A sequence needs at least one (input, target) pair.
            if ids.len() >= 2 {
                sequences.push(ids);
            }
        }
        if sequences.is_empty() {
            return Err(RuntimeError::Training(anyhow::anyhow!(
                "no example survived tokenization"
            )));
        }

        let micro_per_step = (params.batch_size * params.gradient_accumulation_steps).max(1);
        let steps_per_epoch = sequences.len().div_ceil(micro_per_step);
        let total_steps = (params.num_epochs * steps_per_epoch).max(1);

        let mut optimizer = AdamW::new(
            self.adapter.trainable_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                ..Default::default()
            },
        )
        .map_err(RuntimeError::training)?;

        info!(
            examples = sequences.len(),
            epochs = params.num_epochs,
            total_steps,
            lr = params.learning_rate,
            "starting adapter training"
        );

        let mut step = 0usize;
        let mut last_loss = f64::NAN;

        for epoch in 0..params.num_epochs {
            for chunk in sequences.chunks(micro_per_step) {
                let mut losses = Vec::with_capacity(chunk.len());
                for seq in chunk {
                    losses.push(self.sequence_loss(seq)?);
                }
                let loss = Tensor::stack(&losses, 0)
                    .and_then(|t| t.mean_all())
                    .map_err(RuntimeError::training)?;

                let lr = lr_at(step, total_steps, params.warmup_steps, params.learning_rate);
                optimizer.set_learning_rate(lr);
                optimizer
                    .backward_step(&loss)
                    .map_err(RuntimeError::training)?;

                last_loss = loss
                    .to_scalar::<f32>()
                    .map_err(RuntimeError::training)? as f64;
                step += 1;

                if params.logging_steps > 0 && step % params.logging_steps == 0 {
                    info!(step, epoch, loss = last_loss, lr, "training step");
                } else {
                    debug!(step, epoch, loss = last_loss, lr, "training step");
                }
                if params.save_steps > 0 && step % params.save_steps == 0 {
                    let checkpoint = params.output_dir.join(format!("checkpoint-{step}"));
                    self.adapter.save(&checkpoint)?;
                    info!(path = %checkpoint.display(), "saved checkpoint");
                }
            }
        }

        self.adapter.save(&params.output_dir)?;
        info!(
            steps = step,
            final_loss = last_loss,
            path = %params.output_dir.display(),
            "training complete"
        );

        Ok(TrainingReport {
            steps: step,
            epochs: params.num_epochs,
            final_loss: last_loss,
            output_dir: params.output_dir.clone(),
        })
    }

    /// Next-token cross-entropy over one sequence. Base logits are built
    /// incrementally so the kv cache is exercised exactly as in inference.
    fn sequence_loss(&mut self, seq: &[u32]) -> Result<Tensor> {
        let inputs = &seq[..seq.len() - 1];
        let targets = &seq[1..];

        let mut base_rows = Vec::with_capacity(inputs.len());
        for (pos, &token) in inputs.iter().enumerate() {
            base_rows.push(self.backbone.forward(&[token], pos)?);
        }
        let base = Tensor::stack(&base_rows, 0)
            .map_err(RuntimeError::training)?
            .detach();

        let x = self.backbone.embed(inputs)?;
        let delta = self.adapter.delta(&x, true)?;
        let delta = self.backbone.head_project(&delta)?;

        let logits = (&base + &delta).map_err(RuntimeError::training)?;
        let target = Tensor::new(targets, self.backbone.device()).map_err(RuntimeError::training)?;
        cross_entropy(&logits, &target).map_err(RuntimeError::training)
    }
}

/// Linear warmup into cosine decay.
fn lr_at(step: usize, total_steps: usize, warmup_steps: usize, base_lr: f64) -> f64 {
    if warmup_steps > 0 && step < warmup_steps {
        return base_lr * (step + 1) as f64 / warmup_steps as f64;
    }
    let decay_steps = total_steps.saturating_sub(warmup_steps).max(1);
    let progress = (step - warmup_steps.min(step)) as f64 / decay_steps as f64;
    let progress = progress.min(1.0);
    base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
}

#[cfg(test)]
mod tests {
    use super::lr_at;

    #[test]
    fn warmup_ramps_linearly() {
        let base = 2e-4;
        assert!(lr_at(0, 100, 10, base) < lr_at(5, 100, 10, base));
        assert_eq!(lr_at(9, 100, 10, base), base);
    }

    #[test]
    fn cosine_decays_to_zero() {
        let base = 2e-4;
        let mid = lr_at(55, 100, 10, base);
        let end = lr_at(100, 100, 10, base);
        assert!(mid < base && mid > 0.0);
        assert!(end.abs() < 1e-12);
    }

    #[test]
    fn no_warmup_starts_at_base() {
        let base = 1e-3;
        assert_eq!(lr_at(0, 10, 0, base), base);
    }
}
