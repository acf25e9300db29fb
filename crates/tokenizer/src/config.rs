//! Configuration types for the tokenizer.
//!
//! [`TokenizerConfig`] captures everything a model requires from text
//! preparation: which subword model to run, how to normalize, and which
//! special tokens wrap a sequence. A `tokenizer.json` file can override most
//! of these fields; the config supplies the fallbacks.
//!
//! # Examples
//!
//! ```rust
//! use tokenizer::{TokenizerConfig, TokenizerKind};
//!
//! let cfg = TokenizerConfig::word_piece(true);
//! assert_eq!(cfg.kind, TokenizerKind::WordPiece);
//! assert_eq!(cfg.special_tokens.cls, "[CLS]");
//!
//! let cfg = TokenizerConfig::unigram(false);
//! assert_eq!(cfg.special_tokens.cls, "<s>");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TokenizerError;

/// Longest word WordPiece will try to split before mapping it to the unknown token.
pub const DEFAULT_MAX_INPUT_CHARS_PER_WORD: usize = 100;

/// Subword model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Greedy longest-match-first with a continuation prefix (BERT family).
    #[default]
    WordPiece,
    /// SentencePiece unigram language model decoded with Viterbi (XLM-R family).
    Unigram,
}

/// Special token strings; resolved to ids against the vocabulary at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub cls: String,
    pub sep: String,
    pub pad: String,
    pub unk: String,
}

impl SpecialTokens {
    pub fn bert() -> Self {
        Self {
            cls: "[CLS]".into(),
            sep: "[SEP]".into(),
            pad: "[PAD]".into(),
            unk: "[UNK]".into(),
        }
    }

    pub fn sentencepiece() -> Self {
        Self {
            cls: "<s>".into(),
            sep: "</s>".into(),
            pad: "<pad>".into(),
            unk: "<unk>".into(),
        }
    }
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self::bert()
    }
}

/// Tokenizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub kind: TokenizerKind,
    /// Apply locale-free Unicode lowercasing.
    pub lowercase: bool,
    /// Strip combining accents. `None` follows `lowercase`, as BERT does.
    pub strip_accents: Option<bool>,
    /// Drop control characters and map every whitespace character to a space.
    pub clean_text: bool,
    /// Surround CJK ideographs with spaces so each becomes its own word.
    pub handle_chinese_chars: bool,
    pub max_input_chars_per_word: usize,
    pub continuing_subword_prefix: String,
    pub special_tokens: SpecialTokens,
}

impl TokenizerConfig {
    /// BERT-style uncased or cased WordPiece.
    pub fn word_piece(lowercase: bool) -> Self {
        Self {
            kind: TokenizerKind::WordPiece,
            lowercase,
            ..Self::default()
        }
    }

    /// SentencePiece unigram with `<s>`/`</s>` wrapping.
    pub fn unigram(lowercase: bool) -> Self {
        Self {
            kind: TokenizerKind::Unigram,
            lowercase,
            strip_accents: Some(false),
            handle_chinese_chars: false,
            special_tokens: SpecialTokens::sentencepiece(),
            ..Self::default()
        }
    }

    /// Effective accent stripping flag.
    pub fn strips_accents(&self) -> bool {
        self.strip_accents.unwrap_or(self.lowercase)
    }

    pub fn validate(&self) -> Result<(), TokenizerError> {
        if self.kind == TokenizerKind::WordPiece && self.max_input_chars_per_word == 0 {
            return Err(TokenizerError::InvalidConfig(
                "max_input_chars_per_word must be >= 1".into(),
            ));
        }
        let specials = &self.special_tokens;
        for (name, value) in [
            ("cls", &specials.cls),
            ("sep", &specials.sep),
            ("unk", &specials.unk),
        ] {
            if value.is_empty() {
                return Err(TokenizerError::InvalidConfig(format!(
                    "special token `{name}` must not be empty"
                )));
            }
        }
        Ok(())
    }
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            kind: TokenizerKind::WordPiece,
            lowercase: true,
            strip_accents: None,
            clean_text: true,
            handle_chinese_chars: true,
            max_input_chars_per_word: DEFAULT_MAX_INPUT_CHARS_PER_WORD,
            continuing_subword_prefix: "##".into(),
            special_tokens: SpecialTokens::bert(),
        }
    }
}
