//! Monotonic log tail
//!
//! Output is appended as it is fetched; a successful search consumes
//! everything up to the end of the match, so the same line can never satisfy
//! two searches. Repeated `logs --recent` snapshots overlap, so only the lines
//! past the overlap with the previous snapshot are appended.

use std::future::Future;
use std::sync::Mutex;

use super::{poll, PollBudget, PollResult};
use crate::common::Result;

#[derive(Debug, Default, Clone)]
pub struct LogTail {
    buffer: Vec<u8>,
    cursor: usize,
    /// Lines of the most recent snapshot
    snapshot: Vec<Vec<u8>>,
}

impl LogTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly fetched output
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Append the part of a full recent-log snapshot not seen before
    ///
    /// The new lines are those after the longest run of lines that ends the
    /// previous snapshot and starts this one. Returns the bytes appended.
    pub fn feed_snapshot(&mut self, snapshot: &[u8]) -> usize {
        let lines: Vec<Vec<u8>> = snapshot
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(<[u8]>::to_vec)
            .collect();

        let overlap = (0..=self.snapshot.len().min(lines.len()))
            .rev()
            .find(|&k| self.snapshot[self.snapshot.len() - k..] == lines[..k])
            .unwrap_or(0);

        let before = self.buffer.len();
        for line in &lines[overlap..] {
            self.buffer.extend_from_slice(line);
            self.buffer.push(b'\n');
        }
        self.snapshot = lines;
        self.buffer.len() - before
    }

    /// Search unconsumed output for `needle`, consuming through the match
    pub fn say(&mut self, needle: &str) -> bool {
        let needle = needle.as_bytes();
        if needle.is_empty() {
            return true;
        }
        let unread = &self.buffer[self.cursor..];
        match unread.windows(needle.len()).position(|w| w == needle) {
            Some(pos) => {
                self.cursor += pos + needle.len();
                true
            }
            None => false,
        }
    }

    /// Total bytes fed so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Unconsumed output, for failure reports
    pub fn unread(&self) -> String {
        String::from_utf8_lossy(&self.buffer[self.cursor..]).into_owned()
    }
}

/// Fetch output until `needle` shows up in `tail`
///
/// Each call to `fetch` returns output that has not been fed yet, such as
/// the new bytes of a streaming command. On failure the unconsumed output is
/// reported as the last observed value.
pub async fn tail_until<F, Fut>(
    tail: &mut LogTail,
    needle: &str,
    budget: PollBudget,
    fetch: F,
) -> PollResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    tail_with(tail, needle, budget, fetch, LogTail::feed).await
}

/// Like [`tail_until`], but each fetch returns a full recent-log snapshot
pub async fn tail_snapshots_until<F, Fut>(
    tail: &mut LogTail,
    needle: &str,
    budget: PollBudget,
    fetch: F,
) -> PollResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    tail_with(tail, needle, budget, fetch, |tail, snapshot| {
        tail.feed_snapshot(snapshot);
    })
    .await
}

async fn tail_with<F, Fut>(
    tail: &mut LogTail,
    needle: &str,
    budget: PollBudget,
    mut fetch: F,
    feed: fn(&mut LogTail, &[u8]),
) -> PollResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    let shared = Mutex::new(tail);
    let result = poll(budget, &mut fetch, |chunk: &Vec<u8>| match shared.lock() {
        Ok(mut tail) => {
            feed(&mut **tail, chunk);
            tail.say(needle)
        }
        Err(_) => false,
    })
    .await;

    let unread = shared
        .into_inner()
        .map(|tail| tail.unread())
        .unwrap_or_default();

    PollResult {
        satisfied: result.satisfied,
        last_observed: Some(if result.satisfied {
            needle.to_string()
        } else {
            unread
        }),
        last_error: result.last_error,
        elapsed: result.elapsed,
        attempts: result.attempts,
    }
}
