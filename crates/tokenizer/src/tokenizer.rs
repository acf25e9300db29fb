use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::config::{TokenizerConfig, TokenizerKind};
use crate::error::TokenizerError;
use crate::loader::{parse_tokenizer_json, parse_vocab_txt, PinnedIds};
use crate::normalize::Normalizer;
use crate::pretokenize::PreTokenizer;
use crate::sequence::TokenSequence;
use crate::unigram::Unigram;
use crate::vocab::Vocabulary;
use crate::wordpiece::WordPiece;

/// Resolved ids of the tokens that frame and pad a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
    pub unk: u32,
}

#[derive(Debug, Clone)]
enum Model {
    WordPiece(WordPiece),
    Unigram(Unigram),
}

/// Text to token ids, deterministic for a given vocabulary and config.
///
/// Cloning is cheap: the vocabulary sits behind an `Arc` and is never
/// mutated, so one tokenizer can serve any number of threads.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Arc<Vocabulary>,
    kind: TokenizerKind,
    normalizer: Normalizer,
    pre_tokenizer: PreTokenizer,
    model: Model,
    special: SpecialIds,
}

impl Tokenizer {
    pub fn new(vocab: Arc<Vocabulary>, config: &TokenizerConfig) -> Result<Self, TokenizerError> {
        Self::with_pinned(vocab, config, PinnedIds::default())
    }

    fn with_pinned(
        vocab: Arc<Vocabulary>,
        config: &TokenizerConfig,
        pinned: PinnedIds,
    ) -> Result<Self, TokenizerError> {
        config.validate()?;
        let specials = &config.special_tokens;
        let resolve = |pinned: Option<u32>, token: &str| {
            pinned
                .or_else(|| vocab.id(token))
                .ok_or_else(|| TokenizerError::MissingSpecialToken(token.to_string()))
        };
        let cls = resolve(pinned.cls, specials.cls.as_str())?;
        let sep = resolve(pinned.sep, specials.sep.as_str())?;
        let unk = resolve(pinned.unk, specials.unk.as_str())?;
        let pad = match pinned.pad.or_else(|| vocab.id(&specials.pad)) {
            Some(id) => id,
            None => {
                debug!(pad_token = %specials.pad, "pad_token_missing_using_zero");
                0
            }
        };
        let bound = vocab.len();
        for (name, id) in [("cls", cls), ("sep", sep), ("pad", pad), ("unk", unk)] {
            if id as usize >= bound {
                return Err(TokenizerError::Load(format!(
                    "{name} id {id} outside vocabulary of {bound}"
                )));
            }
        }

        let (model, pre_tokenizer) = match config.kind {
            TokenizerKind::WordPiece => (
                Model::WordPiece(WordPiece::new(
                    unk,
                    config.continuing_subword_prefix.clone(),
                    config.max_input_chars_per_word,
                )),
                PreTokenizer::Bert,
            ),
            TokenizerKind::Unigram => (
                Model::Unigram(Unigram::new(&vocab, unk)?),
                PreTokenizer::Metaspace,
            ),
        };

        debug!(
            kind = ?config.kind,
            vocab_size = vocab.len(),
            lowercase = config.lowercase,
            "tokenizer_ready"
        );

        Ok(Self {
            vocab,
            kind: config.kind,
            normalizer: Normalizer::from_config(config),
            pre_tokenizer,
            model,
            special: SpecialIds { cls, sep, pad, unk },
        })
    }

    /// Parses a `tokenizer.json` document. Fields present in the file win over
    /// `fallback`.
    pub fn from_json_str(json: &str, fallback: &TokenizerConfig) -> Result<Self, TokenizerError> {
        let parsed = parse_tokenizer_json(json, fallback)?;
        Self::with_pinned(Arc::new(parsed.vocab), &parsed.config, parsed.pinned)
    }

    /// Parses a BERT `vocab.txt` (one token per line, id = line number).
    pub fn from_vocab_txt(text: &str, config: &TokenizerConfig) -> Result<Self, TokenizerError> {
        Self::new(Arc::new(parse_vocab_txt(text)?), config)
    }

    /// Loads `tokenizer.json` or, for any other file name, a `vocab.txt`.
    pub fn from_file(path: impl AsRef<Path>, config: &TokenizerConfig) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text, config)
        } else {
            Self::from_vocab_txt(&text, config)
        }
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn kind(&self) -> TokenizerKind {
        self.kind
    }

    pub fn special_ids(&self) -> SpecialIds {
        self.special
    }

    pub fn pad_id(&self) -> u32 {
        self.special.pad
    }

    /// Encodes `text` into at most `max_len` ids, framing sequence included.
    ///
    /// Only the first `max_len - 2` content tokens are kept; the framing
    /// tokens are always present, so `max_len` below 2 is treated as 2.
    /// Words past the budget are never split into pieces.
    pub fn encode(&self, text: &str, max_len: usize) -> TokenSequence {
        let budget = max_len.max(2) - 2;
        let normalized = self.normalizer.normalize(text);

        let mut content: Vec<u32> = Vec::with_capacity(budget.min(normalized.len() + 1));
        let mut pieces: Vec<u32> = Vec::new();
        let mut truncated = false;
        for word in self.pre_tokenizer.words(&normalized) {
            if content.len() == budget {
                truncated = true;
                break;
            }
            pieces.clear();
            match &self.model {
                Model::WordPiece(model) => model.tokenize_word(&self.vocab, &word, &mut pieces),
                Model::Unigram(model) => model.tokenize_word(&self.vocab, &word, &mut pieces),
            }
            let room = budget - content.len();
            if pieces.len() > room {
                content.extend_from_slice(&pieces[..room]);
                truncated = true;
                break;
            }
            content.extend_from_slice(&pieces);
        }

        TokenSequence::wrap(self.special.cls, &content, self.special.sep, truncated)
    }

    /// Like [`encode`](Self::encode) for a slot that may hold no text.
    pub fn encode_input(
        &self,
        index: usize,
        text: Option<&str>,
        max_len: usize,
    ) -> Result<TokenSequence, TokenizerError> {
        text.map(|t| self.encode(t, max_len))
            .ok_or(TokenizerError::InvalidInput { index })
    }

    /// Encodes every text in parallel; output order matches input order.
    pub fn encode_batch<S>(&self, texts: &[S], max_len: usize) -> Vec<TokenSequence>
    where
        S: AsRef<str> + Sync,
    {
        texts
            .par_iter()
            .map(|text| self.encode(text.as_ref(), max_len))
            .collect()
    }

    /// Parallel encode of optional slots; the first missing slot (lowest
    /// index) is reported.
    pub fn encode_inputs(
        &self,
        texts: &[Option<&str>],
        max_len: usize,
    ) -> Result<Vec<TokenSequence>, TokenizerError> {
        if let Some(index) = texts.iter().position(Option::is_none) {
            return Err(TokenizerError::InvalidInput { index });
        }
        Ok(texts
            .par_iter()
            .map(|text| self.encode((*text).unwrap_or_default(), max_len))
            .collect())
    }
}
