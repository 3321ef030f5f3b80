//! Sentence segmentation for incremental synthesis
//!
//! Splits streamed reply text into speakable segments so synthesis can start
//! before the agent has finished generating.

/// Segmenter configuration
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// Hard cap; longer runs are cut at the last space before it
    pub max_chars: usize,
    /// A sentence boundary only closes a segment once it has this many chars
    pub min_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_chars: 200,
            min_chars: 10,
        }
    }
}

/// Incremental text segmenter
#[derive(Debug)]
pub struct TextSegmenter {
    config: SegmenterConfig,
    buffer: String,
}

impl TextSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config: SegmenterConfig {
                max_chars: config.max_chars.max(1),
                min_chars: config.min_chars.min(config.max_chars),
            },
            buffer: String::new(),
        }
    }

    /// Add a streamed fragment
    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Next complete segment, if one is available
    pub fn next_segment(&mut self) -> Option<String> {
        loop {
            let end = self.sentence_end().or_else(|| self.length_cut())?;
            if let Some(segment) = self.split_at(end) {
                return Some(segment);
            }
        }
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> Vec<String> {
        let mut segments = Vec::new();
        while let Some(segment) = self.next_segment() {
            segments.push(segment);
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if !rest.is_empty() {
            segments.push(rest.to_string());
        }
        segments
    }

    /// Text not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte offset just past the first usable sentence terminator.
    ///
    /// A terminator only counts once it is followed by whitespace, so "3.5"
    /// split across fragments is not cut.
    fn sentence_end(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let boundary = match c {
                '\n' => true,
                c if is_sentence_end(c) => chars.peek().is_some_and(|(_, next)| next.is_whitespace()),
                _ => false,
            };
            if !boundary {
                continue;
            }
            let end = i + c.len_utf8();
            if self.buffer[..end].trim().chars().count() >= self.config.min_chars {
                return Some(end);
            }
        }
        None
    }

    fn length_cut(&self) -> Option<usize> {
        let (cap, _) = self.buffer.char_indices().nth(self.config.max_chars)?;
        let head = &self.buffer[..cap];
        match head.rfind(char::is_whitespace) {
            Some(space) if space > 0 => Some(space),
            _ => Some(cap),
        }
    }

    /// Split off `buffer[..end]`; `None` if that part was only whitespace
    fn split_at(&mut self, end: usize) -> Option<String> {
        let rest = self.buffer.split_off(end);
        let head = std::mem::replace(&mut self.buffer, rest.trim_start().to_string());
        let head = head.trim();
        (!head.is_empty()).then(|| head.to_string())
    }
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';' | '\u{3002}' | '\u{FF01}' | '\u{FF1F}' | '\u{0964}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(max_chars: usize, min_chars: usize) -> TextSegmenter {
        TextSegmenter::new(SegmenterConfig {
            max_chars,
            min_chars,
        })
    }

    #[test]
    fn test_splits_on_sentences_across_fragments() {
        let mut seg = segmenter(200, 5);
        seg.push("Hello there");
        assert_eq!(seg.next_segment(), None);

        seg.push(". How are ");
        assert_eq!(seg.next_segment().as_deref(), Some("Hello there."));
        assert_eq!(seg.next_segment(), None);

        seg.push("you?");
        assert_eq!(seg.finish(), vec!["How are you?".to_string()]);
    }

    #[test]
    fn test_short_sentences_merge_until_min() {
        let mut seg = segmenter(200, 10);
        seg.push("Hi. Yes. That works. ");
        assert_eq!(seg.next_segment().as_deref(), Some("Hi. Yes. That works."));
    }

    #[test]
    fn test_decimal_not_split() {
        let mut seg = segmenter(200, 1);
        seg.push("Price is 3.");
        seg.push("5 dollars. ");
        assert_eq!(seg.next_segment().as_deref(), Some("Price is 3.5 dollars."));
    }

    #[test]
    fn test_length_cap_cuts_at_space() {
        let mut seg = segmenter(12, 1);
        seg.push("one two three four five");
        assert_eq!(seg.next_segment().as_deref(), Some("one two"));
        assert_eq!(seg.next_segment().as_deref(), Some("three four"));
        assert_eq!(seg.finish(), vec!["five".to_string()]);
    }

    #[test]
    fn test_length_cap_without_spaces() {
        let mut seg = segmenter(4, 1);
        seg.push("abcdefghij");
        assert_eq!(seg.next_segment().as_deref(), Some("abcd"));
        assert_eq!(seg.next_segment().as_deref(), Some("efgh"));
        assert_eq!(seg.pending(), "ij");
    }

    #[test]
    fn test_finish_on_empty() {
        let mut seg = segmenter(10, 1);
        seg.push("   ");
        assert!(seg.finish().is_empty());
    }
}
