use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::catalog::Catalog;

/// Number of matches returned when the caller does not ask for a limit
pub const DEFAULT_TOP_N: usize = 20;

/// Placeholder spreadsheet exports write into empty cells
pub const MISSING_PLACEHOLDER: &str = "nan";

lazy_static! {
    // Anything that is not part of a word: letters, combining marks (Bengali
    // vowel signs, hasanta), digits and the joiners used in conjuncts.
    static ref WORD_BREAK: Regex = Regex::new(r"[^\p{L}\p{M}\p{N}\x{200C}\x{200D}]+").unwrap();
}

/// A dictionary word used as a rhyme candidate
///
/// `length` is carried alongside the text because word sheets ship a
/// precomputed length column; ranking uses it as the secondary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub length: usize,
}

impl Token {
    /// Create a token whose length is its character count
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let length = text.chars().count();
        Token { text, length }
    }

    /// Create a token with an externally supplied length
    pub fn with_length(text: impl Into<String>, length: usize) -> Self {
        Token {
            text: text.into(),
            length,
        }
    }

    /// Whether this token can take part in matching at all
    ///
    /// Empty cells and the missing-value placeholder are rejected.
    pub fn is_usable(&self) -> bool {
        !is_missing(&self.text)
    }
}

/// True for blank text or the spreadsheet "missing" placeholder
pub fn is_missing(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.eq_ignore_ascii_case(MISSING_PLACEHOLDER)
}

/// One ranked rhyme candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub token: String,
    pub token_length: usize,
    pub suffix_length: usize,
    pub suffix_text: String,
}

/// Number of trailing characters `a` and `b` have in common
pub fn common_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

// Last `n` characters of `text`; `n` never exceeds the char count here.
fn char_tail(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let start = text
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &text[start..]
}

/// Find the tokens that share the longest ending with `query`
///
/// Every token is compared character by character from the end. Tokens with
/// no common trailing character are dropped; the rest are ranked by suffix
/// length and then token length, both descending. The sort is stable, so
/// tokens that tie on both keys keep the order they were supplied in.
///
/// A blank query or `top_n == 0` yields an empty result.
///
/// # Examples
/// ```
/// use rabindra::suffix::{Token, find_suffix_matches};
///
/// let tokens = vec![
///     Token::with_length("ভালোবাসা", 8),
///     Token::with_length("বাসা", 4),
///     Token::with_length("আশা", 3),
/// ];
/// let matches = find_suffix_matches("বাসা", &tokens, 20);
/// assert_eq!(matches[0].token, "ভালোবাসা");
/// assert_eq!(matches[0].suffix_length, 4);
/// ```
pub fn find_suffix_matches<'a, I>(query: &str, tokens: I, top_n: usize) -> Vec<Match>
where
    I: IntoIterator<Item = &'a Token>,
{
    let query = query.trim();
    if query.is_empty() || top_n == 0 {
        return Vec::new();
    }

    let mut matches: Vec<Match> = tokens
        .into_iter()
        .filter(|token| token.is_usable())
        .filter_map(|token| {
            let suffix_length = common_suffix_len(query, &token.text);
            if suffix_length == 0 {
                return None;
            }
            Some(Match {
                token: token.text.clone(),
                token_length: token.length,
                suffix_length,
                suffix_text: char_tail(query, suffix_length).to_string(),
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.suffix_length
            .cmp(&a.suffix_length)
            .then(b.token_length.cmp(&a.token_length))
    });
    matches.truncate(top_n);
    matches
}

/// The rhyme dictionary: an ordered, read-only list of tokens
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordList {
    tokens: Vec<Token>,
}

impl WordList {
    /// Build a word list, dropping blank and placeholder tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        WordList {
            tokens: tokens.into_iter().filter(Token::is_usable).collect(),
        }
    }

    /// Build a word list from bare words, measuring each one
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(words.into_iter().map(Token::new).collect())
    }

    /// Collect every distinct word from song titles and lyrics
    ///
    /// Used when no separate word sheet is configured. Words keep the order
    /// of their first appearance.
    pub fn harvest(catalog: &Catalog) -> Self {
        let mut seen = HashSet::new();
        let mut tokens = Vec::new();

        for song in catalog.songs() {
            for text in [&song.title, &song.lyrics] {
                for word in WORD_BREAK.split(text) {
                    if word.is_empty() || seen.contains(word) {
                        continue;
                    }
                    seen.insert(word.to_string());
                    tokens.push(Token::new(word));
                }
            }
        }

        Self::new(tokens)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    /// Rank this list against `query`
    pub fn find_matches(&self, query: &str, top_n: usize) -> Vec<Match> {
        find_suffix_matches(query, &self.tokens, top_n)
    }
}

impl<'a> IntoIterator for &'a WordList {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}
