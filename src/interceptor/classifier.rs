// SPDX-License-Identifier: Apache-2.0

//! Query classification
//!
//! Maps raw SQL text to a [`QueryType`] by looking at the first keyword,
//! after skipping whitespace and leading `--` / `/* */` comments.

use super::types::QueryType;

/// Classify SQL text; `None` or blank input yields [`QueryType::Other`]
pub fn classify<'a>(sql: impl Into<Option<&'a str>>) -> QueryType {
    let Some(sql) = sql.into() else {
        return QueryType::Other;
    };

    match first_keyword(sql) {
        Some(word) if word.eq_ignore_ascii_case("select") => QueryType::Select,
        Some(word) if word.eq_ignore_ascii_case("insert") => QueryType::Insert,
        Some(word) if word.eq_ignore_ascii_case("update") => QueryType::Update,
        Some(word) if word.eq_ignore_ascii_case("delete") => QueryType::Delete,
        _ => QueryType::Other,
    }
}

/// First alphabetic token after leading whitespace and comments
fn first_keyword(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = match comment.find('\n') {
                Some(end) => &comment[end + 1..],
                None => "",
            };
        } else if let Some(comment) = rest.strip_prefix("/*") {
            // an unterminated block comment hides the whole statement
            let end = comment.find("*/")?;
            rest = &comment[end + 2..];
        } else {
            break;
        }
    }

    let len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    if len == 0 {
        None
    } else {
        Some(&rest[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_basic_keywords() {
        assert_eq!(classify("SELECT * FROM t"), QueryType::Select);
        assert_eq!(classify("insert into t values (1)"), QueryType::Insert);
        assert_eq!(classify("Update t set a = 1"), QueryType::Update);
        assert_eq!(classify("delete from t"), QueryType::Delete);
        assert_eq!(classify("CREATE TABLE t (id int)"), QueryType::Other);
    }

    #[test]
    fn test_leading_comments() {
        assert_eq!(classify("  -- comment\nSELECT * FROM t"), QueryType::Select);
        assert_eq!(classify("/* hint */ delete from t"), QueryType::Delete);
        assert_eq!(
            classify("-- one\n  /* two\n lines */\n\tINSERT INTO t VALUES (1)"),
            QueryType::Insert
        );
    }

    #[test]
    fn test_empty_and_missing() {
        assert_eq!(classify(""), QueryType::Other);
        assert_eq!(classify("   \n\t"), QueryType::Other);
        assert_eq!(classify(None::<&str>), QueryType::Other);
        assert_eq!(classify("-- only a comment"), QueryType::Other);
        assert_eq!(classify("/* unterminated select"), QueryType::Other);
    }

    #[test]
    fn test_only_first_token_counts() {
        assert_eq!(classify("selector"), QueryType::Other);
        assert_eq!(classify("select(1)"), QueryType::Select);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), QueryType::Other);
    }

    fn prefix_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                "[ \t\n]{1,3}",
                "[a-z ]{0,10}".prop_map(|s| format!("-- {}\n", s)),
                "[a-z ]{0,10}".prop_map(|s| format!("/* {} */", s)),
            ],
            0..4,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn prop_prefix_does_not_change_kind(
            prefix in prefix_strategy(),
            keyword in prop_oneof![
                Just("select"), Just("INSERT"), Just("Update"), Just("delete"), Just("merge")
            ],
        ) {
            let bare = format!("{} something", keyword);
            let prefixed = format!("{}{}", prefix, bare);
            prop_assert_eq!(classify(prefixed.as_str()), classify(bare.as_str()));
        }

        #[test]
        fn prop_never_panics(sql in ".*") {
            let _ = classify(sql.as_str());
        }
    }
}
