// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Byte accumulator for codecs that want input in fixed-size chunks.

use std::collections::VecDeque;

struct Chunk {
    data: Vec<u8>,
    pts: Option<u64>,
}

/// Queue of input bytes that remembers the timestamps of the frames they came from.
#[derive(Default)]
pub(crate) struct ByteAdapter {
    chunks: VecDeque<Chunk>,
    /// Bytes already taken from the front chunk.
    skip: usize,
    available: usize,
    prev_pts: Option<u64>,
}

impl ByteAdapter {
    pub(crate) fn push(&mut self, data: &[u8], pts: Option<u64>) {
        if data.is_empty() {
            return;
        }
        self.available += data.len();
        self.chunks.push_back(Chunk {
            data: data.to_vec(),
            pts,
        });
    }

    pub(crate) fn available(&self) -> usize {
        self.available
    }

    /// Timestamp of the frame the next byte belongs to, or of the last timestamped
    /// frame before it.
    pub(crate) fn prev_timestamp(&self) -> Option<u64> {
        self.chunks
            .front()
            .and_then(|chunk| chunk.pts)
            .or(self.prev_pts)
    }

    /// Removes up to `size` bytes from the front.
    pub(crate) fn take(&mut self, size: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(size.min(self.available));
        while out.len() < size {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let remaining = &front.data[self.skip..];
            let n = remaining.len().min(size - out.len());
            out.extend_from_slice(&remaining[..n]);
            self.skip += n;
            if self.skip == front.data.len() {
                if let Some(chunk) = self.chunks.pop_front() {
                    if chunk.pts.is_some() {
                        self.prev_pts = chunk.pts;
                    }
                }
                self.skip = 0;
            }
        }
        self.available -= out.len();
        out
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
        self.skip = 0;
        self.available = 0;
        self.prev_pts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_spans_chunks() {
        let mut adapter = ByteAdapter::default();
        adapter.push(&[1, 2, 3], Some(100));
        adapter.push(&[4, 5], Some(200));
        assert_eq!(adapter.available(), 5);
        assert_eq!(adapter.take(4), vec![1, 2, 3, 4]);
        assert_eq!(adapter.available(), 1);
        assert_eq!(adapter.prev_timestamp(), Some(200));
        assert_eq!(adapter.take(10), vec![5]);
        assert_eq!(adapter.available(), 0);
    }

    #[test]
    fn prev_timestamp_survives_consumed_chunks() {
        let mut adapter = ByteAdapter::default();
        adapter.push(&[1, 2], Some(100));
        adapter.push(&[3, 4], None);
        adapter.take(3);
        assert_eq!(adapter.prev_timestamp(), Some(100));
        adapter.clear();
        assert_eq!(adapter.prev_timestamp(), None);
        assert_eq!(adapter.available(), 0);
    }
}
