//! Token counting and first-chunk extraction
//!
//! The context budget is measured in model tokens. Each candidate only
//! contributes the first chunk of its page content.

use crate::config::ContextConfig;
use crate::errors::{AppError, Result};
use std::sync::Arc;
use text_splitter::{ChunkConfig, TextSplitter};
use tiktoken_rs::CoreBPE;

pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Leading chunk of at most the configured chunk size, in tokens
    fn first_chunk(&self, text: &str) -> String;

    fn name(&self) -> &str;
}

/// `cl100k_base` BPE, as used by the completion models
pub struct Cl100kTokenizer {
    bpe: CoreBPE,
    splitter: TextSplitter<CoreBPE>,
}

impl Cl100kTokenizer {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let load = || {
            tiktoken_rs::cl100k_base().map_err(|e| AppError::Configuration {
                message: format!("Failed to load cl100k_base: {}", e),
            })
        };

        let chunk_config = ChunkConfig::new(chunk_size.max(1))
            .with_overlap(chunk_overlap)
            .map_err(|e| AppError::Configuration {
                message: format!("Invalid chunking parameters: {}", e),
            })?
            .with_sizer(load()?);

        Ok(Self {
            bpe: load()?,
            splitter: TextSplitter::new(chunk_config),
        })
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn first_chunk(&self, text: &str) -> String {
        self.splitter
            .chunks(text)
            .next()
            .map(str::to_string)
            .unwrap_or_default()
    }

    fn name(&self) -> &str {
        "cl100k_base"
    }
}

/// One token per whitespace-separated word
pub struct WordTokenizer {
    chunk_size: usize,
}

impl WordTokenizer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn first_chunk(&self, text: &str) -> String {
        text.split_whitespace()
            .take(self.chunk_size)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn name(&self) -> &str {
        "words"
    }
}

/// Create a tokenizer based on configuration
pub fn create_tokenizer(config: &ContextConfig) -> Result<Arc<dyn Tokenizer>> {
    match config.tokenizer.as_str() {
        "cl100k" | "cl100k_base" => Ok(Arc::new(Cl100kTokenizer::new(
            config.chunk_size,
            config.chunk_overlap,
        )?)),
        "words" => Ok(Arc::new(WordTokenizer::new(config.chunk_size))),
        other => Err(AppError::Configuration {
            message: format!("Unknown tokenizer: {}", other),
        }),
    }
}
