// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UTF-8 tokenizer: maximal runs of letters or digits, case-folded.

/// Splits `content` into maximal runs of Unicode letters or digits,
/// case-folded via `char::to_lowercase`. Restartable from any byte offset
/// into the original string since it only ever reads forward.
pub struct Tokenizer<'a> {
    chars: std::str::CharIndices<'a>,
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(content: &'a str) -> Self {
        Tokenizer {
            chars: content.char_indices(),
            source: content,
        }
    }
}

fn is_token_char(c: char) -> bool {
    c.is_alphabetic() || c.is_numeric()
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut start = None;
        let mut end = self.source.len();
        for (idx, c) in self.chars.by_ref() {
            if is_token_char(c) {
                if start.is_none() {
                    start = Some(idx);
                }
                end = idx + c.len_utf8();
            } else if start.is_some() {
                break;
            }
        }
        let start = start?;
        let raw = &self.source[start..end];
        Some(raw.chars().flat_map(char::to_lowercase).collect())
    }
}

/// Convenience: tokenizes `content` into an owned vector.
pub fn tokenize(content: &str) -> Vec<String> {
    Tokenizer::new(content).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_whitespace() {
        let tokens = tokenize("The quick, brown fox!");
        assert_eq!(tokens, vec!["the", "quick", "brown", "fox"]);
    }

    #[test]
    fn keeps_digits_as_their_own_class() {
        let tokens = tokenize("v2 release-2024");
        assert_eq!(tokens, vec!["v2", "release", "2024"]);
    }

    #[test]
    fn folds_unicode_case() {
        let tokens = tokenize("CAFÉ Straße");
        assert_eq!(tokens, vec!["café", "straße"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("   ...  ").is_empty());
    }

    #[test]
    fn restarts_cleanly_mid_token() {
        let content = "alpha beta gamma";
        let mut it = Tokenizer::new(&content[6..]);
        assert_eq!(it.next().as_deref(), Some("beta"));
        assert_eq!(it.next().as_deref(), Some("gamma"));
        assert_eq!(it.next(), None);
    }
}
