//! Decoding of back-to-back JSON values from one text blob.
//!
//! Build tools such as `cargo build --message-format=json` print one JSON
//! object per event without wrapping them in an array. [`JsonStream`] walks
//! such a blob with an explicit cursor and yields each value in turn.

use std::iter::FusedIterator;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed JSON value at byte {offset}: {source}")]
pub struct DecodeError {
    /// Byte offset where the malformed value starts.
    pub offset: usize,
    #[source]
    pub source: serde_json::Error,
}

/// Lazy iterator over whitespace-separated JSON values.
///
/// Each step yields `Some(Ok(value))`, `Some(Err(DecodeError))` or `None`.
/// `None` means the input ended cleanly. After a decode error the stream is
/// fused: the malformed value is never skipped.
///
/// A scalar glued to non-delimiter text (`1x`, `truefalse`) is rejected as a
/// whole at the scalar's start; the leading number is not yielded on its own.
/// Objects, arrays and strings end at their closing character, so
/// `{"a":1}{"b":2}` still splits.
#[derive(Debug)]
pub struct JsonStream<'a, T = Value> {
    text: &'a str,
    cursor: usize,
    failed: bool,
    marker: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> JsonStream<'a, T> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            cursor: 0,
            failed: false,
            marker: PhantomData,
        }
    }

    /// Byte offset of the next unread character.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.cursor
    }

    /// Rewind to the start of the text.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.failed = false;
    }
}

impl<T: DeserializeOwned> Iterator for JsonStream<'_, T> {
    type Item = Result<T, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let rest = &self.text[self.cursor..];
        self.cursor += rest.len() - rest.trim_start().len();
        if self.cursor == self.text.len() {
            return None;
        }

        let start = self.cursor;
        let mut values = serde_json::Deserializer::from_str(&self.text[start..]).into_iter::<T>();
        match values.next() {
            Some(Ok(value)) => {
                self.cursor = start + values.byte_offset();
                Some(Ok(value))
            }
            Some(Err(source)) => {
                self.failed = true;
                Some(Err(DecodeError {
                    offset: start,
                    source,
                }))
            }
            None => {
                self.cursor = self.text.len();
                None
            }
        }
    }
}

impl<T: DeserializeOwned> FusedIterator for JsonStream<'_, T> {}

/// Untyped stream over `text`.
#[must_use]
pub fn decode_stacked(text: &str) -> JsonStream<'_, Value> {
    JsonStream::new(text)
}
