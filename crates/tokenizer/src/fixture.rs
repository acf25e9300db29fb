//! Small, fully deterministic tokenizer descriptions for tests and benches.
//!
//! The WordPiece vocabulary covers every lowercase ASCII letter both as a word
//! start and as a `##` continuation, so any lowercase ASCII word encodes
//! without unknown tokens.

use serde_json::{json, Map, Value};

/// Special tokens, punctuation and a handful of whole words; single letters
/// and `##` letters are appended by [`word_piece_tokens`].
pub const WORD_PIECE_VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", ".", ",", "!", "?", ":", "'", "-", "hello",
    "world", "the", "quick", "brown", "fox", "jump", "##s", "##ed", "##ing", "over", "lazy",
    "dog", "passage", "query", "embed", "##ding", "text", "search", "cat", "中", "文", "a", "b",
    "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s", "t", "u",
    "v", "w", "x", "y", "z", "##a", "##b", "##c", "##d", "##e", "##f", "##g", "##h", "##i",
    "##j", "##k", "##l", "##m", "##n", "##o", "##p", "##q", "##r", "##t", "##u", "##v", "##w",
    "##x", "##y", "##z",
];

pub fn word_piece_tokens() -> Vec<String> {
    WORD_PIECE_VOCAB.iter().map(|t| t.to_string()).collect()
}

/// `tokenizer.json` for an uncased BERT-style WordPiece model.
pub fn word_piece_json() -> String {
    let vocab: Map<String, Value> = WORD_PIECE_VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": {"pad_id": 0, "pad_token": "[PAD]", "pad_type_id": 0},
        "added_tokens": [
            {"id": 0, "content": "[PAD]", "special": true},
            {"id": 1, "content": "[UNK]", "special": true},
            {"id": 2, "content": "[CLS]", "special": true},
            {"id": 3, "content": "[SEP]", "special": true},
            {"id": 4, "content": "[MASK]", "special": true}
        ],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": {"type": "BertPreTokenizer"},
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 0}}
            ],
            "special_tokens": {
                "[CLS]": {"id": "[CLS]", "ids": [2], "tokens": ["[CLS]"]},
                "[SEP]": {"id": "[SEP]", "ids": [3], "tokens": ["[SEP]"]}
            }
        },
        "model": {
            "type": "WordPiece",
            "unk_token": "[UNK]",
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": vocab
        }
    })
    .to_string()
}

/// Pieces and log-probabilities for a tiny SentencePiece unigram model.
pub fn unigram_pieces() -> Vec<(String, f64)> {
    let mut pieces: Vec<(String, f64)> = vec![
        ("<s>".into(), 0.0),
        ("<pad>".into(), 0.0),
        ("</s>".into(), 0.0),
        ("<unk>".into(), 0.0),
        ("\u{2581}".into(), -2.0),
        ("\u{2581}hello".into(), -3.0),
        ("\u{2581}world".into(), -3.5),
        ("\u{2581}Hello".into(), -3.2),
        ("\u{2581}the".into(), -2.5),
        ("ing".into(), -4.0),
        ("\u{2581}emb".into(), -6.0),
        ("ed".into(), -4.5),
    ];
    for ch in ('a'..='z').chain('A'..='Z') {
        pieces.push((ch.to_string(), -8.0));
    }
    pieces
}

/// `tokenizer.json` for an XLM-R style unigram model.
pub fn unigram_json() -> String {
    let vocab: Vec<Value> = unigram_pieces()
        .into_iter()
        .map(|(piece, score)| json!([piece, score]))
        .collect();
    json!({
        "version": "1.0",
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": "<s>", "special": true},
            {"id": 1, "content": "<pad>", "special": true},
            {"id": 2, "content": "</s>", "special": true},
            {"id": 3, "content": "<unk>", "special": true}
        ],
        "normalizer": {"type": "Sequence", "normalizers": [
            {"type": "Precompiled", "precompiled_charsmap": null},
            {"type": "Replace", "pattern": {"Regex": " {2,}"}, "content": " "}
        ]},
        "pre_tokenizer": {"type": "Metaspace", "replacement": "\u{2581}", "prepend_scheme": "always"},
        "post_processor": {
            "type": "RobertaProcessing",
            "sep": ["</s>", 2],
            "cls": ["<s>", 0],
            "trim_offsets": true,
            "add_prefix_space": true
        },
        "model": {"type": "Unigram", "unk_id": 3, "vocab": vocab}
    })
    .to_string()
}
