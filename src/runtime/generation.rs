//! Token-by-token sampling shared by the local and adapter runtimes.

use std::time::{SystemTime, UNIX_EPOCH};

use candle_transformers::generation::LogitsProcessor;
use candle_transformers::utils::apply_repeat_penalty;
use tokenizers::Tokenizer;

use crate::config::GenerationDefaults;
use crate::error::{Result, RuntimeError};
use crate::lora::LoraAdapter;
use crate::runtime::CausalBackbone;

const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<|im_end|>"];

/// Prompt-length bound for runtimes whose config does not set one.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 2048;

/// Encode `prompt`, keeping at most the trailing `max_input_tokens` ids.
pub fn encode_prompt(
    tokenizer: &Tokenizer,
    prompt: &str,
    max_input_tokens: usize,
) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| RuntimeError::Generation(anyhow::anyhow!(e)))?;
    let mut ids = encoding.get_ids().to_vec();
    if ids.len() > max_input_tokens {
        ids.drain(..ids.len() - max_input_tokens);
    }
    if ids.is_empty() {
        return Err(RuntimeError::Generation(anyhow::anyhow!(
            "prompt produced no tokens"
        )));
    }
    Ok(ids)
}

fn eos_ids(tokenizer: &Tokenizer) -> Vec<u32> {
    EOS_CANDIDATES
        .iter()
        .filter_map(|s| tokenizer.token_to_id(s))
        .collect()
}

fn sampling_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(299_792_458)
}

/// Greedy/top-p decoding loop. When `adapter` is present its low-rank
/// correction is mixed into the base logits before sampling. Only the
/// generated ids are decoded, so the returned text never echoes the prompt.
pub fn generate_text(
    backbone: &mut dyn CausalBackbone,
    tokenizer: &Tokenizer,
    adapter: Option<&LoraAdapter>,
    prompt: &str,
    params: &GenerationDefaults,
    max_input_tokens: usize,
) -> Result<String> {
    let prompt_ids = encode_prompt(tokenizer, prompt, max_input_tokens)?;
    let eos = eos_ids(tokenizer);

    let temperature = if params.temperature <= 0.0 {
        None
    } else {
        Some(params.temperature)
    };
    let mut sampler = LogitsProcessor::new(sampling_seed(), temperature, Some(params.top_p));

    let mut all_tokens = prompt_ids.clone();
    let mut generated: Vec<u32> = Vec::new();

    // Prompt pass fills the kv cache in one shot; afterwards each step
    // feeds only the newly sampled token.
    let mut logits = backbone.forward(&prompt_ids, 0)?;

    for _ in 0..params.max_tokens {
        if let Some(lora) = adapter {
            let last = *all_tokens
                .last()
                .ok_or_else(|| RuntimeError::Generation(anyhow::anyhow!("empty token buffer")))?;
            let x = backbone.embed(&[last])?;
            let delta = lora.delta(&x, false)?;
            let delta = backbone
                .head_project(&delta)?
                .squeeze(0)
                .map_err(RuntimeError::generation)?;
            logits = (&logits + &delta).map_err(RuntimeError::generation)?;
        }
        if params.repeat_penalty != 1.0 {
            let start = all_tokens.len().saturating_sub(params.repeat_last_n);
            logits = apply_repeat_penalty(&logits, params.repeat_penalty, &all_tokens[start..])
                .map_err(RuntimeError::generation)?;
        }

        let next = sampler.sample(&logits).map_err(RuntimeError::generation)?;
        if eos.contains(&next) {
            break;
        }
        generated.push(next);
        all_tokens.push(next);

        logits = backbone.forward(&[next], all_tokens.len() - 1)?;
    }

    let text = tokenizer
        .decode(&generated, true)
        .map_err(|e| RuntimeError::Generation(anyhow::anyhow!(e)))?;
    Ok(text.trim().to_string())
}
