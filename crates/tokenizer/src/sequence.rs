/// Token ids for one document, wrapped in the model's special tokens.
///
/// `attention_mask` runs parallel to `ids`; it is all `true` for an encoded
/// document and only gains `false` entries once a batch pads the row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenSequence {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<bool>,
    /// Content was dropped to fit the length limit.
    pub truncated: bool,
}

impl TokenSequence {
    /// Wraps content ids as `[begin] content.. [end]`.
    pub fn wrap(begin: u32, content: &[u32], end: u32, truncated: bool) -> Self {
        let mut ids = Vec::with_capacity(content.len() + 2);
        ids.push(begin);
        ids.extend_from_slice(content);
        ids.push(end);
        let attention_mask = vec![true; ids.len()];
        Self {
            ids,
            attention_mask,
            truncated,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Count of positions the model should attend to.
    pub fn attended(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m).count()
    }
}
