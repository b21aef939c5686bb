// Prompt assembly and model output validation

mod assembler;
mod output;

pub use assembler::{Prompt, PromptAssembler, JSON_ONLY_INSTRUCTION, STRICT_JSON_INSTRUCTION};
pub use output::{parse_model_output, validate_output, OutputError};
