//! Reading tokenizer descriptions from disk formats.
//!
//! Two layouts are understood: the `tokenizer.json` file written by the
//! Hugging Face `tokenizers` library (WordPiece and Unigram models) and the
//! plain BERT `vocab.txt` with one token per line. Only the parts that affect
//! encoding are read; everything else in the file is ignored.

use serde_json::Value;

use crate::config::{TokenizerConfig, TokenizerKind};
use crate::error::TokenizerError;
use crate::vocab::Vocabulary;

/// Special token ids pinned by the file itself, taking precedence over a
/// lookup of the configured token strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PinnedIds {
    pub cls: Option<u32>,
    pub sep: Option<u32>,
    pub pad: Option<u32>,
    pub unk: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct Parsed {
    pub vocab: Vocabulary,
    pub config: TokenizerConfig,
    pub pinned: PinnedIds,
}

pub(crate) fn parse_vocab_txt(text: &str) -> Result<Vocabulary, TokenizerError> {
    Vocabulary::from_tokens(
        text.lines()
            .map(|line| line.trim_end_matches(['\r', '\n']))
            .filter(|line| !line.is_empty()),
    )
}

pub(crate) fn parse_tokenizer_json(
    json: &str,
    fallback: &TokenizerConfig,
) -> Result<Parsed, TokenizerError> {
    let root: Value = serde_json::from_str(json)?;
    let model = root
        .get("model")
        .ok_or_else(|| TokenizerError::Load("missing `model` section".into()))?;
    let vocab_value = model
        .get("vocab")
        .ok_or_else(|| TokenizerError::Load("model has no `vocab`".into()))?;

    let kind = match (model.get("type").and_then(Value::as_str), vocab_value) {
        (Some("WordPiece"), _) | (None, Value::Object(_)) => TokenizerKind::WordPiece,
        (Some("Unigram"), _) | (None, Value::Array(_)) => TokenizerKind::Unigram,
        (Some(other), _) => {
            return Err(TokenizerError::Load(format!(
                "unsupported tokenizer model `{other}`"
            )));
        }
        (None, _) => return Err(TokenizerError::Load("unrecognized vocab layout".into())),
    };

    let mut config = if kind == fallback.kind {
        fallback.clone()
    } else {
        match kind {
            TokenizerKind::WordPiece => TokenizerConfig::word_piece(fallback.lowercase),
            TokenizerKind::Unigram => TokenizerConfig::unigram(fallback.lowercase),
        }
    };
    let mut pinned = PinnedIds::default();

    let vocab = match kind {
        TokenizerKind::WordPiece => {
            let map = vocab_value
                .as_object()
                .ok_or_else(|| TokenizerError::Load("WordPiece vocab must be an object".into()))?;
            let mut pairs = Vec::with_capacity(map.len());
            for (token, id) in map {
                let id = id
                    .as_u64()
                    .and_then(|id| u32::try_from(id).ok())
                    .ok_or_else(|| TokenizerError::Load(format!("bad id for token `{token}`")))?;
                pairs.push((token.clone(), id));
            }
            if let Some(unk) = model.get("unk_token").and_then(Value::as_str) {
                config.special_tokens.unk = unk.to_string();
            }
            if let Some(prefix) = model.get("continuing_subword_prefix").and_then(Value::as_str) {
                config.continuing_subword_prefix = prefix.to_string();
            }
            if let Some(max) = model.get("max_input_chars_per_word").and_then(Value::as_u64) {
                config.max_input_chars_per_word = max as usize;
            }
            Vocabulary::from_pairs(pairs)?
        }
        TokenizerKind::Unigram => {
            let entries = vocab_value
                .as_array()
                .ok_or_else(|| TokenizerError::Load("Unigram vocab must be an array".into()))?;
            let mut pieces = Vec::with_capacity(entries.len());
            for (idx, entry) in entries.iter().enumerate() {
                let piece = entry.get(0).and_then(Value::as_str);
                let score = entry.get(1).and_then(Value::as_f64);
                match (piece, score) {
                    (Some(piece), Some(score)) => pieces.push((piece.to_string(), score)),
                    _ => {
                        return Err(TokenizerError::Load(format!(
                            "malformed unigram entry {idx}"
                        )));
                    }
                }
            }
            pinned.unk = model
                .get("unk_id")
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok());
            Vocabulary::from_scored(pieces)?
        }
    };

    if let Some(normalizer) = root.get("normalizer") {
        apply_normalizer(normalizer, &mut config);
    }
    if let Some(processor) = root.get("post_processor") {
        apply_post_processor(processor, &mut config, &mut pinned);
    }
    if let Some(padding) = root.get("padding").filter(|p| !p.is_null()) {
        if let Some(token) = padding.get("pad_token").and_then(Value::as_str) {
            config.special_tokens.pad = token.to_string();
        }
        pinned.pad = padding
            .get("pad_id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok());
    }
    if let Some(added) = root.get("added_tokens").and_then(Value::as_array) {
        apply_added_tokens(added, &config, &mut pinned);
    }

    Ok(Parsed {
        vocab,
        config,
        pinned,
    })
}

fn apply_normalizer(normalizer: &Value, config: &mut TokenizerConfig) {
    match normalizer.get("type").and_then(Value::as_str) {
        Some("BertNormalizer") => {
            if let Some(flag) = normalizer.get("clean_text").and_then(Value::as_bool) {
                config.clean_text = flag;
            }
            if let Some(flag) = normalizer.get("handle_chinese_chars").and_then(Value::as_bool) {
                config.handle_chinese_chars = flag;
            }
            if let Some(flag) = normalizer.get("lowercase").and_then(Value::as_bool) {
                config.lowercase = flag;
            }
            config.strip_accents = normalizer.get("strip_accents").and_then(Value::as_bool);
        }
        Some("Lowercase") => config.lowercase = true,
        Some("StripAccents") => config.strip_accents = Some(true),
        Some("Sequence") => {
            for inner in normalizer
                .get("normalizers")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                apply_normalizer(inner, config);
            }
        }
        _ => {}
    }
}

fn apply_post_processor(processor: &Value, config: &mut TokenizerConfig, pinned: &mut PinnedIds) {
    match processor.get("type").and_then(Value::as_str) {
        Some("TemplateProcessing") => {
            let mut before_sequence = true;
            for piece in processor
                .get("single")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if piece.get("Sequence").is_some() {
                    before_sequence = false;
                    continue;
                }
                let Some(name) = piece
                    .get("SpecialToken")
                    .and_then(|s| s.get("id"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let id = processor
                    .get("special_tokens")
                    .and_then(|s| s.get(name))
                    .and_then(|s| s.get("ids"))
                    .and_then(|ids| ids.get(0))
                    .and_then(Value::as_u64)
                    .and_then(|id| u32::try_from(id).ok());
                if before_sequence {
                    config.special_tokens.cls = name.to_string();
                    pinned.cls = id;
                } else {
                    config.special_tokens.sep = name.to_string();
                    pinned.sep = id;
                }
            }
        }
        Some("BertProcessing") | Some("RobertaProcessing") => {
            if let Some((token, id)) = token_pair(processor.get("cls")) {
                config.special_tokens.cls = token;
                pinned.cls = id;
            }
            if let Some((token, id)) = token_pair(processor.get("sep")) {
                config.special_tokens.sep = token;
                pinned.sep = id;
            }
        }
        Some("Sequence") => {
            for inner in processor
                .get("processors")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                apply_post_processor(inner, config, pinned);
            }
        }
        _ => {}
    }
}

fn token_pair(value: Option<&Value>) -> Option<(String, Option<u32>)> {
    let pair = value?.as_array()?;
    let token = pair.first()?.as_str()?.to_string();
    let id = pair
        .get(1)
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok());
    Some((token, id))
}

fn apply_added_tokens(added: &[Value], config: &TokenizerConfig, pinned: &mut PinnedIds) {
    let specials = &config.special_tokens;
    for token in added {
        let (Some(content), Some(id)) = (
            token.get("content").and_then(Value::as_str),
            token
                .get("id")
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok()),
        ) else {
            continue;
        };
        for (name, slot) in [
            (&specials.cls, &mut pinned.cls),
            (&specials.sep, &mut pinned.sep),
            (&specials.pad, &mut pinned.pad),
            (&specials.unk, &mut pinned.unk),
        ] {
            if name == content && slot.is_none() {
                *slot = Some(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;

    #[test]
    fn parses_wordpiece_json() {
        let parsed =
            parse_tokenizer_json(&fixture::word_piece_json(), &TokenizerConfig::default())
                .unwrap();
        assert_eq!(parsed.config.kind, TokenizerKind::WordPiece);
        assert!(parsed.config.lowercase);
        assert_eq!(parsed.config.special_tokens.cls, "[CLS]");
        assert_eq!(parsed.pinned.cls, Some(2));
        assert_eq!(parsed.pinned.sep, Some(3));
        assert_eq!(parsed.pinned.pad, Some(0));
        assert_eq!(parsed.vocab.len(), fixture::WORD_PIECE_VOCAB.len());
    }

    #[test]
    fn parses_unigram_json() {
        let parsed =
            parse_tokenizer_json(&fixture::unigram_json(), &TokenizerConfig::default()).unwrap();
        assert_eq!(parsed.config.kind, TokenizerKind::Unigram);
        assert_eq!(parsed.config.special_tokens.cls, "<s>");
        assert_eq!(parsed.pinned.unk, Some(3));
        assert_eq!(parsed.pinned.cls, Some(0));
        assert_eq!(parsed.pinned.sep, Some(2));
        assert!(parsed.vocab.has_scores());
    }

    #[test]
    fn bert_processing_sets_specials() {
        let json = r#"{
            "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 3], "cls": ["[CLS]", 2]},
            "model": {"type": "WordPiece", "unk_token": "[UNK]",
                      "vocab": {"[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3}}
        }"#;
        let parsed = parse_tokenizer_json(json, &TokenizerConfig::default()).unwrap();
        assert_eq!(parsed.pinned.cls, Some(2));
        assert_eq!(parsed.pinned.sep, Some(3));
    }

    #[test]
    fn normalizer_sequence_lowercase() {
        let json = r#"{
            "normalizer": {"type": "Sequence", "normalizers": [{"type": "NFD"}, {"type": "Lowercase"}]},
            "model": {"vocab": {"[UNK]": 0, "[CLS]": 1, "[SEP]": 2}}
        }"#;
        let parsed = parse_tokenizer_json(json, &TokenizerConfig::word_piece(false)).unwrap();
        assert!(parsed.config.lowercase);
    }

    #[test]
    fn rejects_bpe() {
        let json = r#"{"model": {"type": "BPE", "vocab": {}, "merges": []}}"#;
        let err = parse_tokenizer_json(json, &TokenizerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("BPE"));
    }

    #[test]
    fn missing_model_section() {
        let err = parse_tokenizer_json("{}", &TokenizerConfig::default()).unwrap_err();
        assert!(matches!(err, TokenizerError::Load(_)));
    }

    #[test]
    fn vocab_txt_lines() {
        let vocab = parse_vocab_txt("[PAD]\r\n[UNK]\nhello\n").unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.id("hello"), Some(2));
    }
}
