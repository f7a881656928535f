//! Instruction-tuning examples and their prompt template.

use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::error::{Result, RuntimeError};

/// One supervised example. `input` is optional extra context; the prompt
/// template changes shape depending on whether it is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub instruction: String,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
}

/// Render an example into the alpaca-style template the model is tuned on.
pub fn format_example(example: &TrainingExample) -> String {
    match example.input.as_deref().filter(|s| !s.is_empty()) {
        Some(input) => format!(
            "### Instruction:\n{}\n\n### Input:\n{}\n\n### Response:\n{}",
            example.instruction, input, example.output
        ),
        None => format!(
            "### Instruction:\n{}\n\n### Response:\n{}",
            example.instruction, example.output
        ),
    }
}

/// Tokenize a rendered example, truncating to `max_seq_length` ids.
pub fn tokenize_example(
    tokenizer: &Tokenizer,
    example: &TrainingExample,
    max_seq_length: usize,
) -> Result<Vec<u32>> {
    let text = format_example(example);
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| RuntimeError::Training(anyhow::anyhow!(e)))?;
    let mut ids = encoding.get_ids().to_vec();
    ids.truncate(max_seq_length);
    Ok(ids)
}
