use std::borrow::Cow;

use crate::normalize::{is_bert_punctuation, is_whitespace};

/// SentencePiece word-boundary marker.
pub const METASPACE: char = '\u{2581}';

/// Splits normalized text into words before subword segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreTokenizer {
    /// Whitespace split with every punctuation character isolated.
    Bert,
    /// Whitespace split with each word prefixed by [`METASPACE`].
    Metaspace,
}

impl PreTokenizer {
    /// Lazily yields words so callers can stop once a token budget is spent.
    pub fn words<'a>(&self, text: &'a str) -> Words<'a> {
        match self {
            PreTokenizer::Bert => Words::Bert(BertWords { rest: text }),
            PreTokenizer::Metaspace => Words::Metaspace(text.split_whitespace()),
        }
    }
}

pub enum Words<'a> {
    Bert(BertWords<'a>),
    Metaspace(std::str::SplitWhitespace<'a>),
}

impl<'a> Iterator for Words<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Words::Bert(words) => words.next().map(Cow::Borrowed),
            Words::Metaspace(words) => words.next().map(|w| {
                let mut word = String::with_capacity(w.len() + METASPACE.len_utf8());
                word.push(METASPACE);
                word.push_str(w);
                Cow::Owned(word)
            }),
        }
    }
}

pub struct BertWords<'a> {
    rest: &'a str,
}

impl<'a> Iterator for BertWords<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let start = self.rest.find(|c: char| !is_whitespace(c))?;
        let rest = &self.rest[start..];
        let first = rest.chars().next()?;
        let end = if is_bert_punctuation(first) {
            first.len_utf8()
        } else {
            rest.find(|c: char| is_whitespace(c) || is_bert_punctuation(c))
                .unwrap_or(rest.len())
        };
        let (word, tail) = rest.split_at(end);
        self.rest = tail;
        Some(word)
    }
}
