use proptest::prelude::*;
use rabindra::suffix::{Match, Token, WordList, find_suffix_matches};

fn tokens_from(words: &[String]) -> Vec<Token> {
    words.iter().map(|word| Token::new(word.as_str())).collect()
}

fn tail(text: &str, len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    chars[chars.len() - len..].iter().collect()
}

fn shares_last_char(query: &str, token: &str) -> bool {
    matches!((query.chars().last(), token.chars().last()), (Some(a), Some(b)) if a == b)
}

// Small alphabets so that random words actually share endings
fn word() -> impl Strategy<Value = String> {
    prop_oneof!["[abc]{1,6}", "[কখাি]{1,5}"]
}

proptest! {
    #[test]
    fn every_match_is_the_longest_common_tail(
        query in word(),
        words in prop::collection::vec(word(), 0..30),
    ) {
        let tokens = tokens_from(&words);
        for m in find_suffix_matches(&query, &tokens, 100) {
            prop_assert!(m.suffix_length >= 1);
            prop_assert_eq!(m.suffix_text.chars().count(), m.suffix_length);
            prop_assert_eq!(&m.suffix_text, &tail(&query, m.suffix_length));
            prop_assert_eq!(&m.suffix_text, &tail(&m.token, m.suffix_length));

            let q: Vec<char> = query.chars().rev().collect();
            let t: Vec<char> = m.token.chars().rev().collect();
            if m.suffix_length < q.len() && m.suffix_length < t.len() {
                prop_assert_ne!(q[m.suffix_length], t[m.suffix_length]);
            }
        }
    }

    #[test]
    fn result_is_bounded(
        query in word(),
        words in prop::collection::vec(word(), 0..30),
        top_n in 0usize..10,
    ) {
        let tokens = tokens_from(&words);
        let candidates = words.iter().filter(|w| shares_last_char(&query, w)).count();
        let matches = find_suffix_matches(&query, &tokens, top_n);
        prop_assert!(matches.len() <= top_n);
        prop_assert_eq!(matches.len(), candidates.min(top_n));
    }

    #[test]
    fn result_is_sorted_descending(
        query in word(),
        words in prop::collection::vec(word(), 0..30),
    ) {
        let tokens = tokens_from(&words);
        let matches = find_suffix_matches(&query, &tokens, 100);
        for pair in matches.windows(2) {
            let a = (pair[0].suffix_length, pair[0].token_length);
            let b = (pair[1].suffix_length, pair[1].token_length);
            prop_assert!(a >= b);
        }
    }

    #[test]
    fn repeated_calls_agree(
        query in word(),
        words in prop::collection::vec(word(), 0..30),
    ) {
        let list = WordList::from_words(words);
        let first = list.find_matches(&query, 20);
        let second = list.find_matches(&query, 20);
        prop_assert_eq!(first, second);
    }
}

#[test]
fn bengali_worked_example() {
    let tokens = vec![
        Token::with_length("ভালোবাসা", 8),
        Token::with_length("বাসা", 4),
        Token::with_length("আশা", 3),
    ];
    let matches = find_suffix_matches("বাসা", &tokens, 20);

    assert_eq!(
        matches,
        vec![
            Match {
                token: "ভালোবাসা".to_string(),
                token_length: 8,
                suffix_length: 4,
                suffix_text: "বাসা".to_string(),
            },
            Match {
                token: "বাসা".to_string(),
                token_length: 4,
                suffix_length: 4,
                suffix_text: "বাসা".to_string(),
            },
            Match {
                token: "আশা".to_string(),
                token_length: 3,
                suffix_length: 1,
                suffix_text: "া".to_string(),
            },
        ]
    );
}

#[test]
fn first_of_three_tied_candidates_wins() {
    let tokens = vec![Token::new("নদী"), Token::new("গদী"), Token::new("হদী")];
    let matches = find_suffix_matches("বদী", &tokens, 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].token, "নদী");
}

#[test]
fn empty_query_or_dictionary() {
    let tokens = vec![Token::new("মেঘ")];
    assert!(find_suffix_matches("", &tokens, 20).is_empty());
    assert!(find_suffix_matches("মেঘ", &Vec::<Token>::new(), 20).is_empty());
}
