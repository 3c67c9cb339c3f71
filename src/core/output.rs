//! Incremental cleanup of generated text.
//!
//! Both the streamed and the non-streamed paths run engine output through
//! [`OutputFilter`], so the concatenation of streamed deltas equals the
//! non-streamed text for the same engine output. Text is released only
//! once no later fragment can change how it cleans: an unclosed `<|...`
//! control token, a trailing `<`, a possible stop-sequence prefix and
//! trailing U+FFFD are held back until they resolve.

use once_cell::sync::Lazy;
use regex::Regex;

use super::stop::StopSequences;

static SPECIAL_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|.*?\|>").unwrap());

const REPLACEMENT_CHAR: char = '\u{FFFD}';

fn is_artifact(c: char) -> bool {
    matches!(
        c,
        '◆' | '◇' | '■' | '□' | '▲' | '△' | '▼' | '▽' | '★' | '☆' | '♦' | '♢'
    ) || (c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
}

/// Strip control tokens, artifact glyphs and control characters.
pub fn clean_generated_text(text: &str) -> String {
    let without_tokens = SPECIAL_TOKEN_RE.replace_all(text, "");
    without_tokens.chars().filter(|&c| !is_artifact(c)).collect()
}

/// Offset where a control token may still be forming, if any.
fn pending_special_start(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = text[from..].find("<|") {
        let start = from + offset;
        let body = &text[start + 2..];
        match (body.find("|>"), body.find('\n')) {
            // the token regex never crosses a line break
            (Some(close), Some(newline)) if newline < close => from = start + 1,
            (Some(close), _) => from = start + 2 + close + 2,
            (None, Some(_)) => from = start + 1,
            (None, None) => return Some(start),
        }
    }
    text.ends_with('<').then(|| text.len() - 1)
}

#[derive(Debug)]
pub struct OutputFilter {
    raw: String,
    /// `raw[..committed]` has been cleaned and released.
    committed: usize,
    text: String,
    stop: Option<StopSequences>,
    stopped: bool,
}

impl OutputFilter {
    pub fn new(stop: Option<StopSequences>) -> Self {
        Self {
            raw: String::new(),
            committed: 0,
            text: String::new(),
            stop,
            stopped: false,
        }
    }

    /// Feed the next engine fragment; returns newly releasable clean text.
    pub fn push(&mut self, fragment: &str) -> String {
        if self.stopped {
            return String::new();
        }
        self.raw.push_str(fragment);

        if let Some(stop) = &self.stop {
            if let Some(pos) = stop.find(&self.raw[self.committed..]) {
                self.raw.truncate(self.committed + pos);
                self.stopped = true;
                return self.flush();
            }
        }

        let end = self.safe_end();
        self.commit(end)
    }

    /// The engine finished; release whatever was held back.
    pub fn finish(&mut self) -> String {
        self.flush()
    }

    /// A stop sequence was hit and the output truncated before it.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Everything released so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    fn safe_end(&self) -> usize {
        let tail = &self.raw[self.committed..];
        let mut end = tail.trim_end_matches(REPLACEMENT_CHAR).len();
        if let Some(pos) = pending_special_start(tail) {
            end = end.min(pos);
        }
        if let Some(pos) = self.stop.as_ref().and_then(|s| s.partial_suffix_start(tail)) {
            end = end.min(pos);
        }
        self.committed + end
    }

    fn flush(&mut self) -> String {
        let end = self
            .raw
            .trim_end_matches(REPLACEMENT_CHAR)
            .len()
            .max(self.committed);
        let released = self.commit(end);
        self.raw.truncate(self.committed);
        released
    }

    fn commit(&mut self, end: usize) -> String {
        if end <= self.committed {
            return String::new();
        }
        let cleaned = clean_generated_text(&self.raw[self.committed..end]);
        self.committed = end;
        self.text.push_str(&cleaned);
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_through(filter: &mut OutputFilter, fragments: &[&str]) -> String {
        let mut out = String::new();
        for f in fragments {
            out.push_str(&filter.push(f));
        }
        out.push_str(&filter.finish());
        out
    }

    fn whole(text: &str, stop: &[&str]) -> String {
        let stop: Vec<String> = stop.iter().map(|s| s.to_string()).collect();
        let mut filter = OutputFilter::new(StopSequences::new(&stop));
        filter.push(text);
        filter.finish();
        filter.into_text()
    }

    #[test]
    fn test_clean_generated_text() {
        assert_eq!(
            clean_generated_text("Hello<|im_end|> ◆world★\u{0007}\n\tok\r\n"),
            "Hello world\n\tok\r\n"
        );
        // a control token never spans lines
        assert_eq!(clean_generated_text("a<|x\ny|>b"), "a<|x\ny|>b");
    }

    #[test]
    fn test_token_split_across_fragments() {
        let mut filter = OutputFilter::new(None);
        assert_eq!(filter.push("The answer<"), "The answer");
        assert_eq!(filter.push("|im_"), "");
        assert_eq!(filter.push("end|> is 4"), " is 4");
        assert_eq!(filter.finish(), "");
        assert_eq!(filter.text(), "The answer is 4");
    }

    #[test]
    fn test_unclosed_token_released_at_newline_and_finish() {
        let mut filter = OutputFilter::new(None);
        assert_eq!(filter.push("a <| b"), "a ");
        assert_eq!(filter.push("\nc"), "<| b\nc");

        let mut filter = OutputFilter::new(None);
        assert_eq!(filter.push("x<|y"), "x");
        assert_eq!(filter.finish(), "<|y");
    }

    #[test]
    fn test_trailing_replacement_char_trimmed() {
        let mut filter = OutputFilter::new(None);
        assert_eq!(filter.push("caf\u{FFFD}"), "caf");
        assert_eq!(filter.finish(), "");
        assert_eq!(filter.text(), "caf");

        // not trailing anymore: kept, same as the whole-text path
        let mut filter = OutputFilter::new(None);
        filter.push("a\u{FFFD}");
        filter.push("b");
        filter.finish();
        assert_eq!(filter.text(), whole("a\u{FFFD}b", &[]));
    }

    #[test]
    fn test_stop_sequence_truncates() {
        let stop = vec!["END".to_string()];
        let mut filter = OutputFilter::new(StopSequences::new(&stop));
        assert_eq!(filter.push("one two E"), "one two ");
        assert_eq!(filter.push("ND three"), "");
        assert!(filter.stopped());
        assert_eq!(filter.push("more"), "");
        assert_eq!(filter.finish(), "");
        assert_eq!(filter.text(), "one two ");
    }

    #[test]
    fn test_held_stop_prefix_released_when_it_diverges() {
        let stop = vec!["END".to_string()];
        let mut filter = OutputFilter::new(StopSequences::new(&stop));
        assert_eq!(filter.push("the EN"), "the ");
        assert_eq!(filter.push("d"), "ENd");
        assert!(!filter.stopped());
    }

    #[test]
    fn test_streamed_equals_whole_for_any_split() {
        let text = "Sure<|im_start|>! ◆Here\u{0001} is <|a\nb|> the plan: STOP now";
        let expected = whole(text, &["STOP"]);
        assert_eq!(expected, "Sure! Here is <|a\nb|> the plan: ");

        let chars: Vec<char> = text.chars().collect();
        for split in 1..chars.len() {
            let head: String = chars[..split].iter().collect();
            let tail: String = chars[split..].iter().collect();
            let stop = vec!["STOP".to_string()];
            let mut filter = OutputFilter::new(StopSequences::new(&stop));
            let streamed = stream_through(&mut filter, &[&head, &tail]);
            assert_eq!(streamed, expected, "split at {split}");
        }

        let mut filter = OutputFilter::new(StopSequences::new(&["STOP".to_string()]));
        let pieces: Vec<String> = chars.iter().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
        assert_eq!(stream_through(&mut filter, &refs), expected);
    }
}
