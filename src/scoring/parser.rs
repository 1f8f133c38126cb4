use regex::Regex;

use super::FALLBACK_SCORE;
use crate::error::{ScorerError, ScorerResult};

/// A numbered score line: "3. 4", "12.5", "1.   2 - strong intent".
/// The score digit must stand alone, so "1. 57" is not a score line.
const SCORE_LINE_PATTERN: &str = r"^\d+\.\s*([1-5])\b";

/// Scores parsed from one completion, aligned to batch positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScores {
    pub scores: Vec<u8>,
    /// Positions that received the fallback score
    pub fallback_count: usize,
}

/// Line-oriented parser for "index. score" completions
pub struct ResponseParser {
    score_line: Regex,
}

impl ResponseParser {
    pub fn new() -> ScorerResult<Self> {
        let score_line = Regex::new(SCORE_LINE_PATTERN)
            .map_err(|e| ScorerError::internal(format!("invalid score line pattern: {}", e)))?;
        Ok(Self { score_line })
    }

    /// Parse a single line, `None` if it is not a score line
    pub fn parse_line(&self, line: &str) -> Option<u8> {
        self.score_line
            .captures(line.trim())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Map response lines positionally onto `batch_len` scores.
    ///
    /// Line i scores keyword i. Non-matching lines score the fallback,
    /// missing lines are padded with it and surplus lines are dropped.
    pub fn parse(&self, response: &str, batch_len: usize) -> ParsedScores {
        let mut fallback_count = 0;
        let mut scores: Vec<u8> = response
            .trim()
            .lines()
            .take(batch_len)
            .map(|line| {
                self.parse_line(line).unwrap_or_else(|| {
                    fallback_count += 1;
                    FALLBACK_SCORE
                })
            })
            .collect();

        let missing = batch_len - scores.len();
        scores.resize(batch_len, FALLBACK_SCORE);

        ParsedScores {
            scores,
            fallback_count: fallback_count + missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResponseParser {
        ResponseParser::new().unwrap()
    }

    #[test]
    fn test_well_formed_lines() {
        let parsed = parser().parse("1. 5\n2. 3\n3. 2", 3);
        assert_eq!(parsed.scores, vec![5, 3, 2]);
        assert_eq!(parsed.fallback_count, 0);
    }

    #[test]
    fn test_short_response_is_padded() {
        let parsed = parser().parse("1. 4\n2. 4", 3);
        assert_eq!(parsed.scores, vec![4, 4, 1]);
        assert_eq!(parsed.fallback_count, 1);
    }

    #[test]
    fn test_malformed_lines_fall_back_in_place() {
        let parsed = parser().parse("1. abc\nnot a score\n3. 5", 3);
        assert_eq!(parsed.scores, vec![1, 1, 5]);
        assert_eq!(parsed.fallback_count, 2);
    }

    #[test]
    fn test_surplus_lines_are_dropped() {
        let parsed = parser().parse("1. 2\n2. 3\n3. 4\n4. 5", 2);
        assert_eq!(parsed.scores, vec![2, 3]);
    }

    #[test]
    fn test_out_of_range_digit_is_malformed() {
        let parsed = parser().parse("1. 6\n2. 0\n3. 9", 3);
        assert_eq!(parsed.scores, vec![1, 1, 1]);

        let p = parser();
        assert_eq!(p.parse_line("1. 57"), None);
        assert_eq!(p.parse_line("2. 10"), None);
        assert_eq!(p.parse_line("3. 4.5"), Some(4));

        let parsed = p.parse("1. 57\n2. 10\n3. 5 - strong intent", 3);
        assert_eq!(parsed.scores, vec![1, 1, 5]);
        assert_eq!(parsed.fallback_count, 2);
    }

    #[test]
    fn test_whitespace_variants() {
        let p = parser();
        assert_eq!(p.parse_line("  7.4  "), Some(4));
        assert_eq!(p.parse_line("10.   2 - informational"), Some(2));
        assert_eq!(p.parse_line("Score: 5"), None);
        assert_eq!(p.parse_line(""), None);
    }

    #[test]
    fn test_empty_response() {
        let parsed = parser().parse("   \n", 4);
        assert_eq!(parsed.scores, vec![1, 1, 1, 1]);
        assert_eq!(parsed.fallback_count, 4);
    }

    #[test]
    fn test_crlf_lines() {
        let parsed = parser().parse("1. 5\r\n2. 2\r\n", 2);
        assert_eq!(parsed.scores, vec![5, 2]);
    }
}
