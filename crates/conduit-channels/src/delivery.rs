// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Reply delivery (spec §4.9): chunk a reply into transport-sized pieces
//! and send them sequentially with per-chunk retry/backoff.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

const DEFAULT_MAX_CHUNK_SIZE: usize = 4000;
const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub max_chunk_size: usize,
    pub chunk_delay: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }
}

/// Byte offset of the `char_count`-th character in `s`, or `s.len()` if `s`
/// is shorter. Always a valid char boundary, unlike a raw byte index.
fn char_boundary_at(s: &str, char_count: usize) -> usize {
    s.char_indices().nth(char_count).map(|(i, _)| i).unwrap_or(s.len())
}

/// Splits `text` into chunks no longer than `max_size` chars, preferring to
/// break at a paragraph boundary, then a single newline, then a sentence
/// boundary, falling back to a hard cut. Concatenating the returned chunks
/// (after trimming the split boundary itself) reproduces `text`.
pub fn chunk_text(text: &str, max_size: usize) -> Vec<String> {
    if text.chars().count() <= max_size {
        return if text.is_empty() { vec![] } else { vec![text.to_string()] };
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.chars().count() <= max_size {
            chunks.push(rest.to_string());
            break;
        }

        let boundary = char_boundary_at(rest, max_size);
        let window = &rest[..boundary];
        let split_at = window
            .rfind("\n\n")
            .map(|i| i + 2)
            .or_else(|| window.rfind('\n').map(|i| i + 1))
            .or_else(|| window.rfind(". ").map(|i| i + 2))
            .filter(|&i| i > 0)
            .unwrap_or(boundary);

        let (head, tail) = rest.split_at(split_at);
        let trimmed = head.trim_end();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        rest = tail.trim_start();
    }

    chunks
}

/// Platform hook for sending one chunk. Implemented as a closure-like trait
/// so `deliver_reply` stays decoupled from any particular `ChannelAdapter`.
#[async_trait]
pub trait ChunkSender: Send + Sync {
    async fn send_chunk(&self, text: &str) -> Result<(), String>;
}

/// Sends `text` to `sender` in chunks, retrying each chunk up to
/// `opts.max_retries` times with exponential backoff. The first chunk whose
/// retries are exhausted aborts delivery of the remaining chunks.
pub async fn deliver_reply(sender: &dyn ChunkSender, text: &str, opts: &DeliveryOptions) -> Result<(), String> {
    let chunks = chunk_text(text, opts.max_chunk_size);
    for (i, chunk) in chunks.iter().enumerate() {
        send_with_retry(sender, chunk, opts).await?;
        if i + 1 < chunks.len() {
            tokio::time::sleep(opts.chunk_delay).await;
        }
    }
    Ok(())
}

async fn send_with_retry(sender: &dyn ChunkSender, chunk: &str, opts: &DeliveryOptions) -> Result<(), String> {
    let mut attempt = 0;
    loop {
        match sender.send_chunk(chunk).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < opts.max_retries => {
                warn!(attempt, error = %e, "chunk delivery failed, retrying");
                let delay = opts.retry_base * (1u32 << attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Blanket impl so any async fn-like closure can act as a [`ChunkSender`]
/// without a bespoke struct, useful at call sites that already have a
/// `Fn(&str) -> impl Future<Output = Result<(), String>>` in hand.
pub struct FnSender<F>(pub F);

#[async_trait]
impl<F, Fut> ChunkSender for FnSender<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    async fn send_chunk(&self, text: &str) -> Result<(), String> {
        (self.0)(text.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", 4000), vec!["hello".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 4000).is_empty());
    }

    #[test]
    fn prefers_paragraph_boundary_when_available() {
        let text = format!("{}\n\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = chunk_text(&text, 15);
        assert!(chunks[0].ends_with('a'));
        assert!(!chunks[0].contains("\n\n"));
    }

    #[test]
    fn falls_back_to_hard_cut_with_no_boundaries() {
        // S7: a 10,000-char paragraph-free string of 200-char sentences.
        let sentence = format!("{}. ", "x".repeat(198));
        let text = sentence.repeat(50); // ~10_000 chars
        let chunks = chunk_text(&text, 4000);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.len() <= 4000);
        }
        let rejoined: String = chunks.join(" ");
        assert_eq!(rejoined.split_whitespace().collect::<String>(), text.split_whitespace().collect::<String>());
    }

    #[test]
    fn does_not_panic_when_max_size_lands_inside_a_multibyte_char() {
        // every char here is 3 bytes; a byte-index split at `max_size` bytes
        // would land mid-character.
        let text = "\u{2728}".repeat(20);
        let chunks = chunk_text(&text, 7);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 7);
        }
        assert_eq!(chunks.concat(), text);
    }

    struct FlakySender {
        fail_first_n: u32,
        attempts: AtomicU32,
        received: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChunkSender for FlakySender {
        async fn send_chunk(&self, text: &str) -> Result<(), String> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err("transient".to_string());
            }
            self.received.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let sender = FlakySender {
            fail_first_n: 2,
            attempts: AtomicU32::new(0),
            received: StdMutex::new(Vec::new()),
        };
        let opts = DeliveryOptions {
            retry_base: Duration::from_millis(1),
            ..Default::default()
        };
        let result = deliver_reply(&sender, "hello", &opts).await;
        assert!(result.is_ok());
        assert_eq!(sender.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_abort_remaining_chunks() {
        let sender = FlakySender {
            fail_first_n: 100,
            attempts: AtomicU32::new(0),
            received: StdMutex::new(Vec::new()),
        };
        let opts = DeliveryOptions {
            retry_base: Duration::from_millis(1),
            max_retries: 2,
            max_chunk_size: 5,
            ..Default::default()
        };
        let result = deliver_reply(&sender, "one two three", &opts).await;
        assert!(result.is_err());
        assert!(sender.received.lock().unwrap().is_empty());
    }
}
