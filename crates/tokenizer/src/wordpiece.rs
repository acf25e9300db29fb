use crate::vocab::Vocabulary;

/// Greedy longest-match-first subword splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordPiece {
    unk_id: u32,
    prefix: String,
    max_input_chars_per_word: usize,
}

impl WordPiece {
    pub fn new(unk_id: u32, prefix: impl Into<String>, max_input_chars_per_word: usize) -> Self {
        Self {
            unk_id,
            prefix: prefix.into(),
            max_input_chars_per_word,
        }
    }

    /// Appends the pieces of `word` to `out`. A word that cannot be fully
    /// covered by the vocabulary, or that is longer than the per-word limit,
    /// becomes a single unknown token.
    pub fn tokenize_word(&self, vocab: &Vocabulary, word: &str, out: &mut Vec<u32>) {
        if word.chars().nth(self.max_input_chars_per_word).is_some() {
            out.push(self.unk_id);
            return;
        }

        let rollback = out.len();
        let mut candidate = String::with_capacity(word.len() + self.prefix.len());
        let mut start = 0;
        while start < word.len() {
            let mut end = word.len();
            let mut matched = None;
            while start < end {
                candidate.clear();
                if start > 0 {
                    candidate.push_str(&self.prefix);
                }
                candidate.push_str(&word[start..end]);
                if let Some(id) = vocab.id(&candidate) {
                    matched = Some(id);
                    break;
                }
                end = match word[start..end].char_indices().next_back() {
                    Some((idx, _)) => start + idx,
                    None => start,
                };
            }

            match matched {
                Some(id) => {
                    out.push(id);
                    start = end;
                }
                None => {
                    out.truncate(rollback);
                    out.push(self.unk_id);
                    return;
                }
            }
        }
    }
}
