use fxhash::FxHashMap;

use crate::error::TokenizerError;

/// Immutable token table shared by every encode call.
///
/// Ids are dense indices into `tokens`. Unigram vocabularies additionally
/// carry a log-probability per piece.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: FxHashMap<String, u32>,
    scores: Option<Vec<f64>>,
}

impl Vocabulary {
    /// Builds a vocabulary where a token's id is its position in `tokens`.
    ///
    /// A repeated token keeps its first id, matching how BERT `vocab.txt`
    /// files are read.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, TokenizerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(TokenizerError::Load("vocabulary is empty".into()));
        }
        let mut index = FxHashMap::default();
        index.reserve(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            let id = u32::try_from(id)
                .map_err(|_| TokenizerError::Load("vocabulary exceeds u32 ids".into()))?;
            index.entry(token.clone()).or_insert(id);
        }
        Ok(Self {
            tokens,
            index,
            scores: None,
        })
    }

    /// Builds a vocabulary from explicit `token -> id` pairs (`tokenizer.json`
    /// WordPiece layout). Gaps in the id range are filled with empty entries
    /// that never match.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, TokenizerError>
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let mut index = FxHashMap::default();
        let mut max_id = None::<u32>;
        for (token, id) in pairs {
            max_id = Some(max_id.map_or(id, |m| m.max(id)));
            index.insert(token, id);
        }
        let Some(max_id) = max_id else {
            return Err(TokenizerError::Load("vocabulary is empty".into()));
        };
        let mut tokens = vec![String::new(); max_id as usize + 1];
        for (token, &id) in &index {
            tokens[id as usize] = token.clone();
        }
        Ok(Self {
            tokens,
            index,
            scores: None,
        })
    }

    /// Builds a scored vocabulary; ids follow piece order.
    pub fn from_scored<I>(pieces: I) -> Result<Self, TokenizerError>
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let (tokens, scores): (Vec<String>, Vec<f64>) = pieces.into_iter().unzip();
        if let Some(bad) = scores.iter().position(|s| !s.is_finite()) {
            return Err(TokenizerError::Load(format!(
                "piece {bad} has a non-finite score"
            )));
        }
        let mut vocab = Self::from_tokens(tokens)?;
        vocab.scores = Some(scores);
        Ok(vocab)
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens
            .get(id as usize)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn score(&self, id: u32) -> Option<f64> {
        self.scores.as_ref()?.get(id as usize).copied()
    }

    pub fn has_scores(&self) -> bool {
        self.scores.is_some()
    }

    pub(crate) fn scores(&self) -> Option<&[f64]> {
        self.scores.as_deref()
    }

    pub(crate) fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of id slots, which is what the embedding table must cover.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
