//! Context Engine Core Components
//!
//! The language-aware layer around the index:
//! - Query understanding (few-shot extraction into a retrieval filter)
//! - Token-budgeted context assembly
//! - Answer generation and source ranking

mod context_stitcher;
pub mod prompts;
mod query_parser;
mod synthesizer;

pub use context_stitcher::{AssembledContext, ContextAssembler, ContextEntry};
pub use query_parser::{QueryUnderstander, RetrievalFilter};
pub use synthesizer::{Persona, Source, SynthesizedAnswer, Synthesizer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language of the question, selecting prompts and the cross-encoder model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    En,
    Fr,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Fr => "fr",
        }
    }

    /// Anything but English goes to the multilingual cross-encoder
    pub fn is_multilingual(&self) -> bool {
        *self != Lang::En
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = crate::errors::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Lang::En),
            "fr" => Ok(Lang::Fr),
            other => Err(crate::errors::AppError::InvalidFormat {
                message: format!("Unsupported language: {other}"),
            }),
        }
    }
}
