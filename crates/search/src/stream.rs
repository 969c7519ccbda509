//! Incremental delivery of a retrieval outcome
//!
//! An accepted answer is emitted one word at a time with a cooperative pause
//! between words; a rejection is a single fallback chunk. Both end with
//! [`StreamChunk::End`]. Chunks are produced on demand and the stream is
//! consumed by value, so dropping it stops production. Once ended it keeps
//! yielding `None`.

use crate::retrieval::Outcome;
use answerforge_common::{config::DEFAULT_FALLBACK_MESSAGE, metrics};
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

/// Event name of the terminal frame
pub const END_EVENT: &str = "end";

/// Payload of the terminal frame
pub const END_DATA: &str = "[]";

/// One unit of an answer stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Data(String),
    End,
}

impl StreamChunk {
    /// Server-sent-events wire form of this chunk
    pub fn to_sse_frame(&self) -> String {
        match self {
            StreamChunk::Data(text) => format!("data: {}\n\n", text),
            StreamChunk::End => format!("event: {}\ndata: {}\n\n", END_EVENT, END_DATA),
        }
    }
}

/// Lazy, finite, single-use sequence of chunks
pub type AnswerStream = BoxStream<'static, StreamChunk>;

/// Turns outcomes into answer streams
#[derive(Debug, Clone)]
pub struct AnswerStreamer {
    word_delay: Duration,
    fallback_message: String,
}

impl Default for AnswerStreamer {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), DEFAULT_FALLBACK_MESSAGE)
    }
}

impl AnswerStreamer {
    pub fn new(word_delay: Duration, fallback_message: impl Into<String>) -> Self {
        Self {
            word_delay,
            fallback_message: fallback_message.into(),
        }
    }

    pub fn word_delay(&self) -> Duration {
        self.word_delay
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    pub fn stream(&self, outcome: Outcome) -> AnswerStream {
        let words = match outcome {
            Outcome::Accepted { answer, .. } => Words::new(answer, self.word_delay),
            // The fallback is one chunk even when it contains spaces.
            Outcome::Rejected { .. } => Words::single(self.fallback_message.clone()),
        };

        stream::unfold(words, |mut words| async move {
            match words.advance().await {
                Some(chunk) => {
                    metrics::record_stream_chunk();
                    Some((chunk, words))
                }
                None => None,
            }
        })
        .fuse()
        .boxed()
    }
}

// Cursor over the text still to be emitted.
struct Words {
    text: String,
    pos: usize,
    whole: bool,
    delay: Duration,
    started: bool,
    finished: bool,
}

impl Words {
    fn new(text: String, delay: Duration) -> Self {
        Self {
            text,
            pos: 0,
            whole: false,
            delay,
            started: false,
            finished: false,
        }
    }

    fn single(text: String) -> Self {
        Self {
            whole: true,
            ..Self::new(text, Duration::ZERO)
        }
    }

    async fn advance(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;

        match self.next_word() {
            Some(word) => Some(StreamChunk::Data(word)),
            None => {
                self.finished = true;
                Some(StreamChunk::End)
            }
        }
    }

    fn next_word(&mut self) -> Option<String> {
        if self.whole {
            if self.pos == 0 {
                self.pos = self.text.len();
                return Some(self.text.clone());
            }
            return None;
        }

        let rest = &self.text[self.pos..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            self.pos = self.text.len();
            return None;
        }
        let skipped = rest.len() - trimmed.len();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let word = trimmed[..end].to_string();
        self.pos += skipped + end;
        Some(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::QueryResult;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn accepted(answer: &str) -> Outcome {
        Outcome::Accepted {
            answer: answer.to_string(),
            matched: QueryResult { matched_index: 0, score: 0.9 },
        }
    }

    fn rejected() -> Outcome {
        Outcome::Rejected {
            best: QueryResult { matched_index: 0, score: 0.3 },
        }
    }

    fn data(s: &str) -> StreamChunk {
        StreamChunk::Data(s.to_string())
    }

    #[test]
    fn test_sse_frames() {
        assert_eq!(data("Paris").to_sse_frame(), "data: Paris\n\n");
        assert_eq!(StreamChunk::End.to_sse_frame(), "event: end\ndata: []\n\n");
    }

    #[tokio::test]
    async fn test_accepted_answer_streams_word_by_word() {
        let streamer = AnswerStreamer::new(Duration::ZERO, "fallback");
        let chunks: Vec<_> = streamer.stream(accepted("Paris is the capital.")).collect().await;
        assert_eq!(
            chunks,
            vec![data("Paris"), data("is"), data("the"), data("capital."), StreamChunk::End]
        );

        let wire: String = chunks.iter().map(StreamChunk::to_sse_frame).collect();
        assert_eq!(
            wire,
            "data: Paris\n\ndata: is\n\ndata: the\n\ndata: capital.\n\nevent: end\ndata: []\n\n"
        );
    }

    #[tokio::test]
    async fn test_irregular_whitespace_collapses() {
        let streamer = AnswerStreamer::new(Duration::ZERO, "fallback");
        let chunks: Vec<_> = streamer.stream(accepted("  one\ttwo\n\n three  ")).collect().await;
        assert_eq!(chunks, vec![data("one"), data("two"), data("three"), StreamChunk::End]);
    }

    #[tokio::test]
    async fn test_rejection_is_single_fallback_chunk() {
        let streamer = AnswerStreamer::default();
        let chunks: Vec<_> = streamer.stream(rejected()).collect().await;
        assert_eq!(chunks, vec![data(DEFAULT_FALLBACK_MESSAGE), StreamChunk::End]);
    }

    #[tokio::test]
    async fn test_empty_answer_only_ends() {
        let streamer = AnswerStreamer::new(Duration::ZERO, "fallback");
        let chunks: Vec<_> = streamer.stream(accepted("   ")).collect().await;
        assert_eq!(chunks, vec![StreamChunk::End]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_words_are_paced() {
        let streamer = AnswerStreamer::new(Duration::from_millis(100), "fallback");
        let start = Instant::now();
        let chunks: Vec<_> = streamer.stream(accepted("a b c d")).collect().await;
        assert_eq!(chunks.len(), 5);

        // one pause after each word
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(450), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_delayed() {
        let streamer = AnswerStreamer::new(Duration::from_secs(5), "fallback");
        let start = Instant::now();
        let chunks: Vec<_> = streamer.stream(rejected()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_produced_on_demand() {
        let streamer = AnswerStreamer::new(Duration::from_millis(100), "fallback");
        let mut stream = streamer.stream(accepted("first second"));

        assert_eq!(stream.next().await, Some(data("first")));
        // the next word is not ready before its pause elapses
        let early = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(early.is_err());
        assert_eq!(stream.next().await, Some(data("second")));
        assert_eq!(stream.next().await, Some(StreamChunk::End));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_stops_producing() {
        let streamer = AnswerStreamer::new(Duration::from_millis(100), "fallback");
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        let mut stream = streamer.stream(accepted("one two three four"));
        let consumer = tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                sink.lock().unwrap().push(chunk);
            }
        });

        // first word is immediate, the second waits on its pause
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*received.lock().unwrap(), vec![data("one")]);

        // client goes away: the task and its stream are dropped
        consumer.abort();
        assert!(consumer.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*received.lock().unwrap(), vec![data("one")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_streams_interleave() {
        let streamer = AnswerStreamer::new(Duration::from_millis(100), "fallback");
        let start = Instant::now();
        let log = Arc::new(Mutex::new(Vec::new()));

        let spawn = |label: &'static str, answer: &str| {
            let log = log.clone();
            let mut stream = streamer.stream(accepted(answer));
            tokio::spawn(async move {
                while let Some(chunk) = stream.next().await {
                    log.lock().unwrap().push((label, chunk, start.elapsed()));
                }
            })
        };
        let a = spawn("a", "a1 a2 a3");
        let b = spawn("b", "b1 b2 b3");
        a.await.unwrap();
        b.await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 8);
        for label in ["a", "b"] {
            let times: Vec<_> = log
                .iter()
                .filter(|(l, _, _)| *l == label)
                .map(|(_, _, t)| t.as_millis() / 100)
                .collect();
            // each stream paces itself without waiting on the other
            assert_eq!(times, vec![0, 1, 2, 3], "stream {}", label);
        }

        // neither stream finishes before the other has started
        let first_end = log.iter().position(|(_, c, _)| *c == StreamChunk::End).unwrap();
        assert!(log[..first_end].iter().any(|(l, _, _)| *l == "a"));
        assert!(log[..first_end].iter().any(|(l, _, _)| *l == "b"));
    }
}
