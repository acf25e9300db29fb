//! Text normalization ahead of subword splitting.
//!
//! Only the transformations a model was trained with are applied:
//!
//! - control-character cleanup and whitespace mapping
//! - CJK ideograph isolation
//! - accent stripping (NFD, then drop non-spacing marks)
//! - Unicode lowercasing
//! - NFKC plus whitespace collapsing for SentencePiece models
//!
//! Normalization is pure: no locale, no clock, no I/O.

use unicode_categories::UnicodeCategories;
use unicode_normalization::UnicodeNormalization;

use crate::config::{TokenizerConfig, TokenizerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    clean_text: bool,
    handle_chinese_chars: bool,
    strip_accents: bool,
    lowercase: bool,
    nfkc: bool,
}

impl Normalizer {
    pub fn from_config(cfg: &TokenizerConfig) -> Self {
        Self {
            clean_text: cfg.clean_text,
            handle_chinese_chars: cfg.handle_chinese_chars,
            strip_accents: cfg.strips_accents(),
            lowercase: cfg.lowercase,
            nfkc: cfg.kind == TokenizerKind::Unigram,
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let composed: String;
        let text = if self.nfkc {
            composed = text.nfkc().collect();
            composed.as_str()
        } else {
            text
        };

        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if self.clean_text {
                if ch == '\0' || ch == '\u{fffd}' || is_control(ch) {
                    continue;
                }
                if is_whitespace(ch) {
                    out.push(' ');
                    continue;
                }
            }
            if self.handle_chinese_chars && is_chinese_char(ch) {
                out.push(' ');
                out.push(ch);
                out.push(' ');
            } else {
                out.push(ch);
            }
        }

        if self.strip_accents {
            out = out.nfd().filter(|c| !c.is_mark_nonspacing()).collect();
        }
        if self.lowercase {
            out = out.to_lowercase();
        }
        if self.nfkc {
            out = collapse_whitespace(&out);
        }
        out
    }
}

/// Collapses whitespace runs to a single space and trims both ends.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(segment);
    }
    out
}

pub(crate) fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r') || ch.is_whitespace()
}

fn is_control(ch: char) -> bool {
    match ch {
        '\t' | '\n' | '\r' => false,
        _ => ch.is_other(),
    }
}

/// BERT treats all ASCII symbols as punctuation, not just Unicode `P*`.
pub(crate) fn is_bert_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation() || ch.is_punctuation()
}

fn is_chinese_char(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B920..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}
