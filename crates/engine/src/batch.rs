//! Grouping token sequences into padded, rectangular sub-batches.

use std::ops::Range;

use ndarray::Array2;
use tokenizer::TokenSequence;
use tracing::debug;

use crate::error::EngineError;

/// One padded group of consecutive documents.
///
/// Row `r` holds document `offset + r`. Every row's true length is at most
/// `width()`; positions past it carry the pad id and a `false` mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    offset: usize,
    input_ids: Array2<u32>,
    attention_mask: Array2<bool>,
    lengths: Vec<usize>,
}

impl Batch {
    /// Pads `sequences` to their longest member. An all-empty group still
    /// gets width 1 so the tensors are never zero-sized.
    pub fn from_sequences(
        offset: usize,
        sequences: &[TokenSequence],
        pad_id: u32,
    ) -> Result<Self, EngineError> {
        let rows = sequences.len();
        let width = sequences.iter().map(TokenSequence::len).max().unwrap_or(0).max(1);

        let mut ids = Vec::with_capacity(rows * width);
        let mut mask = Vec::with_capacity(rows * width);
        let mut lengths = Vec::with_capacity(rows);
        for seq in sequences {
            let len = seq.len();
            ids.extend_from_slice(&seq.ids);
            ids.extend(std::iter::repeat_n(pad_id, width - len));
            mask.extend_from_slice(&seq.attention_mask);
            mask.extend(std::iter::repeat_n(false, width - len));
            lengths.push(len);
        }

        let input_ids = Array2::from_shape_vec((rows, width), ids)
            .map_err(|e| EngineError::ModelExecution(format!("padding ids failed: {e}")))?;
        let attention_mask = Array2::from_shape_vec((rows, width), mask)
            .map_err(|e| EngineError::ModelExecution(format!("padding mask failed: {e}")))?;
        Ok(Self {
            offset,
            input_ids,
            attention_mask,
            lengths,
        })
    }

    /// Builds a batch from raw tensors, e.g. for driving an engine directly.
    pub fn from_arrays(
        offset: usize,
        input_ids: Array2<u32>,
        attention_mask: Array2<bool>,
    ) -> Result<Self, EngineError> {
        if input_ids.dim() != attention_mask.dim() {
            return Err(EngineError::ModelExecution(format!(
                "ids shape {:?} does not match mask shape {:?}",
                input_ids.dim(),
                attention_mask.dim()
            )));
        }
        let lengths = attention_mask
            .rows()
            .into_iter()
            .map(|row| row.iter().filter(|&&m| m).count())
            .collect();
        Ok(Self {
            offset,
            input_ids,
            attention_mask,
            lengths,
        })
    }

    /// Index of the first document in the caller's list.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rows(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn width(&self) -> usize {
        self.input_ids.ncols()
    }

    /// Caller indices covered by this batch.
    pub fn documents(&self) -> Range<usize> {
        self.offset..self.offset + self.rows()
    }

    pub fn input_ids(&self) -> &Array2<u32> {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &Array2<bool> {
        &self.attention_mask
    }

    /// Unpadded length of each row.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// `rows * width`, the size of every per-token tensor for this batch.
    pub fn padded_tokens(&self) -> usize {
        self.rows() * self.width()
    }
}

/// Splits a document list into consecutive padded groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlanner {
    pad_id: u32,
    max_batch_tokens: Option<usize>,
}

impl BatchPlanner {
    pub fn new(pad_id: u32) -> Self {
        Self {
            pad_id,
            max_batch_tokens: None,
        }
    }

    /// Caps `rows * padded_width` per group. A group always keeps at least one
    /// sequence, so a single long document may exceed the cap on its own.
    pub fn with_max_batch_tokens(mut self, budget: Option<usize>) -> Self {
        self.max_batch_tokens = budget;
        self
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn max_batch_tokens(&self) -> Option<usize> {
        self.max_batch_tokens
    }

    /// Document ranges of each group, without building tensors.
    ///
    /// `batch_size == 0` means a single group (subject to the token budget);
    /// a negative size is a caller error.
    pub fn group_ranges(
        &self,
        lengths: &[usize],
        batch_size: i64,
    ) -> Result<Vec<Range<usize>>, EngineError> {
        if batch_size < 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "batch_size must not be negative (got {batch_size})"
            )));
        }
        if self.max_batch_tokens == Some(0) {
            return Err(EngineError::InvalidConfiguration(
                "max_batch_tokens must be positive".into(),
            ));
        }
        if lengths.is_empty() {
            return Ok(Vec::new());
        }

        let cap = match usize::try_from(batch_size) {
            Ok(0) | Err(_) => lengths.len(),
            Ok(n) => n,
        };
        let budget = self.max_batch_tokens.unwrap_or(usize::MAX);

        let mut ranges = Vec::new();
        let mut start = 0;
        let mut width = 0;
        for (i, &len) in lengths.iter().enumerate() {
            let count = i - start;
            let new_width = width.max(len).max(1);
            let over_budget = (count + 1).saturating_mul(new_width) > budget;
            if count > 0 && (count == cap || over_budget) {
                ranges.push(start..i);
                start = i;
                width = len.max(1);
            } else {
                width = new_width;
            }
        }
        ranges.push(start..lengths.len());
        Ok(ranges)
    }

    /// Groups and pads `sequences`, preserving their order.
    pub fn plan(
        &self,
        sequences: &[TokenSequence],
        batch_size: i64,
    ) -> Result<Vec<Batch>, EngineError> {
        let lengths: Vec<usize> = sequences.iter().map(TokenSequence::len).collect();
        let ranges = self.group_ranges(&lengths, batch_size)?;
        debug!(
            documents = sequences.len(),
            batches = ranges.len(),
            batch_size,
            "batch_plan"
        );
        ranges
            .into_iter()
            .map(|range| {
                let offset = range.start;
                Batch::from_sequences(offset, &sequences[range], self.pad_id)
            })
            .collect()
    }
}
