use crate::error::TokenizerError;
use crate::vocab::Vocabulary;

/// Score penalty applied to an unknown character below the worst known piece.
const UNK_PENALTY: f64 = 10.0;

/// SentencePiece unigram model: picks the segmentation with the highest total
/// log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Unigram {
    unk_id: u32,
    unk_score: f64,
    max_piece_chars: usize,
}

impl Unigram {
    pub fn new(vocab: &Vocabulary, unk_id: u32) -> Result<Self, TokenizerError> {
        let scores = vocab
            .scores()
            .ok_or_else(|| TokenizerError::Load("unigram vocabulary has no scores".into()))?;
        if vocab.token(unk_id).is_none() {
            return Err(TokenizerError::MissingSpecialToken(format!("unk id {unk_id}")));
        }
        let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max_piece_chars = vocab
            .tokens()
            .iter()
            .map(|t| t.chars().count())
            .max()
            .unwrap_or(1)
            .max(1);
        Ok(Self {
            unk_id,
            unk_score: min_score - UNK_PENALTY,
            max_piece_chars,
        })
    }

    /// Viterbi decode of one pre-tokenized word; runs of unknown characters
    /// collapse into a single unknown id.
    pub fn tokenize_word(&self, vocab: &Vocabulary, word: &str, out: &mut Vec<u32>) {
        let mut bounds: Vec<usize> = word.char_indices().map(|(i, _)| i).collect();
        bounds.push(word.len());
        let n = bounds.len() - 1;
        if n == 0 {
            return;
        }

        // best[i] = (score, start of last piece, piece id or None for unknown)
        let mut best: Vec<(f64, usize, Option<u32>)> = vec![(f64::NEG_INFINITY, 0, None); n + 1];
        best[0].0 = 0.0;

        for end in 1..=n {
            let mut single_char_known = false;
            for start in end.saturating_sub(self.max_piece_chars)..end {
                let base = best[start].0;
                if base == f64::NEG_INFINITY {
                    continue;
                }
                let piece = &word[bounds[start]..bounds[end]];
                let Some(id) = vocab.id(piece) else { continue };
                if start + 1 == end {
                    single_char_known = true;
                }
                let score = base + vocab.score(id).unwrap_or(self.unk_score);
                if score > best[end].0 {
                    best[end] = (score, start, Some(id));
                }
            }
            if !single_char_known && best[end - 1].0 > f64::NEG_INFINITY {
                let score = best[end - 1].0 + self.unk_score;
                if score > best[end].0 {
                    best[end] = (score, end - 1, None);
                }
            }
        }

        let mut pieces = Vec::new();
        let mut pos = n;
        while pos > 0 {
            let (_, start, id) = best[pos];
            pieces.push(id.unwrap_or(self.unk_id));
            pos = start;
        }
        pieces.reverse();
        pieces.dedup_by(|a, b| *a == self.unk_id && *b == self.unk_id);
        out.extend(pieces);
    }
}
