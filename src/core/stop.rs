use aho_corasick::{AhoCorasick, MatchKind};
use tracing::warn;

/// Client stop sequences, matched over generated text.
#[derive(Debug, Clone)]
pub struct StopSequences {
    automaton: AhoCorasick,
    patterns: Vec<String>,
}

impl StopSequences {
    /// Returns `None` when there is nothing to match.
    pub fn new(patterns: &[String]) -> Option<Self> {
        let patterns: Vec<String> = patterns.iter().filter(|p| !p.is_empty()).cloned().collect();
        if patterns.is_empty() {
            return None;
        }
        match AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)
        {
            Ok(automaton) => Some(Self {
                automaton,
                patterns,
            }),
            Err(e) => {
                warn!(error = %e, "Failed to build stop sequence matcher; relying on the engine");
                None
            }
        }
    }

    /// Byte offset of the first stop sequence in `text`.
    pub fn find(&self, text: &str) -> Option<usize> {
        self.automaton.find(text).map(|m| m.start())
    }

    /// Start of the longest suffix of `text` that could still grow into a
    /// stop sequence. Text from there on must not be released yet.
    pub fn partial_suffix_start(&self, text: &str) -> Option<usize> {
        let longest = self.patterns.iter().map(String::len).max().unwrap_or(0);
        let floor = text.len().saturating_sub(longest.saturating_sub(1));
        text.char_indices()
            .map(|(i, _)| i)
            .filter(|&i| i >= floor)
            .find(|&i| {
                let suffix = &text[i..];
                self.patterns
                    .iter()
                    .any(|p| p.len() > suffix.len() && p.starts_with(suffix))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops(patterns: &[&str]) -> StopSequences {
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        StopSequences::new(&patterns).unwrap()
    }

    #[test]
    fn test_empty_patterns() {
        assert!(StopSequences::new(&[]).is_none());
        assert!(StopSequences::new(&[String::new()]).is_none());
    }

    #[test]
    fn test_find_leftmost() {
        let s = stops(&["END", "STOP"]);
        assert_eq!(s.find("abc STOP def END"), Some(4));
        assert_eq!(s.find("nothing here"), None);
    }

    #[test]
    fn test_partial_suffix() {
        let s = stops(&["</answer>"]);
        assert_eq!(s.partial_suffix_start("the answer is 42</ans"), Some(16));
        assert_eq!(s.partial_suffix_start("the answer is 42<"), Some(16));
        assert_eq!(s.partial_suffix_start("the answer is 42"), None);
    }

    #[test]
    fn test_partial_suffix_multibyte() {
        let s = stops(&["éé"]);
        assert_eq!(s.partial_suffix_start("caf é"), Some(4));
    }
}
