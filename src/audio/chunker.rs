//! Splits a byte stream into spans no longer than a fixed capacity.

use std::slice::Chunks;

/// Stateless splitter bound to one span capacity.
///
/// The player builds one from the output buffer capacity, the protocol layer
/// one from the maximum audio payload per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    capacity: usize,
}

impl Chunker {
    /// Returns `None` for a zero capacity, which could never make progress.
    pub fn new(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        Some(Self { capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// One-shot traversal of `data` in order: full spans, then the remainder.
    pub fn split<'a>(&self, data: &'a [u8]) -> Chunks<'a, u8> {
        data.chunks(self.capacity)
    }

    /// Number of spans `split` yields for `len` bytes.
    pub fn span_count(&self, len: usize) -> usize {
        len.div_ceil(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(Chunker::new(0).is_none());
    }

    #[test]
    fn test_empty_input_yields_no_spans() {
        let chunker = Chunker::new(4).unwrap();
        assert_eq!(chunker.split(&[]).count(), 0);
        assert_eq!(chunker.span_count(0), 0);
    }

    #[test]
    fn test_spans_reassemble_input() {
        for capacity in 1..=9 {
            let chunker = Chunker::new(capacity).unwrap();
            for len in 0..=40 {
                let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
                let spans: Vec<&[u8]> = chunker.split(&data).collect();

                assert_eq!(spans.len(), chunker.span_count(len));
                assert_eq!(spans.concat(), data);
                if let Some((last, full)) = spans.split_last() {
                    assert!(full.iter().all(|s| s.len() == capacity));
                    let expected_last = if len % capacity == 0 { capacity } else { len % capacity };
                    assert_eq!(last.len(), expected_last);
                }
            }
        }
    }
}
