use regex::Regex;
use thiserror::Error;

use podtail_types::{Match, SearchOptions, SearchResult};

/// Errors surfaced by the search engine
#[derive(Debug, Error)]
pub enum SearchError {
    /// Callers are expected to treat empty input as "clear search" before
    /// invoking the engine; reaching the engine with one is reported, not
    /// silently matched against everything.
    #[error("empty search term")]
    EmptyTerm,

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}

/// Find all matches of `term` across `lines`.
///
/// Pure function of its inputs: no hidden state, so a recompute after the
/// buffer gains lines is always from scratch. Matches are ordered by line
/// number, then start offset, and are non-overlapping within a line.
///
/// Literal mode is substring search; `whole_word` requires word boundaries
/// on both sides and `case_sensitive = false` folds case. In regex mode the
/// term is compiled as written, with the case flag still applied via `(?i)`
/// and `whole_word` ignored.
pub fn search(
    lines: &[String],
    term: &str,
    options: SearchOptions,
) -> Result<SearchResult, SearchError> {
    if term.is_empty() {
        return Err(SearchError::EmptyTerm);
    }

    let regex = compile(term, options)?;

    let mut matches = Vec::new();
    for (line_number, line) in lines.iter().enumerate() {
        for m in regex.find_iter(line) {
            matches.push(Match::new(line_number, m.start(), m.end()));
        }
    }

    Ok(SearchResult {
        term: term.to_string(),
        options,
        matches,
    })
}

/// Build the matcher for one term/options pair.
///
/// Literal terms are escaped so only regex mode can fail to compile.
fn compile(term: &str, options: SearchOptions) -> Result<Regex, SearchError> {
    let mut pattern = if options.regex_enabled {
        term.to_string()
    } else {
        let escaped = regex::escape(term);
        if options.whole_word {
            format!(r"\b{escaped}\b")
        } else {
            escaped
        }
    };

    if !options.case_sensitive {
        pattern = format!("(?i){pattern}");
    }

    Regex::new(&pattern).map_err(|source| SearchError::InvalidPattern {
        pattern: term.to_string(),
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn literal_search_finds_matches_with_offsets() {
        let lines = lines(&["error: disk full", "info: ok", "error: disk ok"]);
        let result = search(&lines, "error", SearchOptions::default()).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.matches[0].line_number, 0);
        assert_eq!((result.matches[0].start, result.matches[0].end), (0, 5));
        assert_eq!(result.matches[1].line_number, 2);
        assert_eq!((result.matches[1].start, result.matches[1].end), (0, 5));
    }

    #[test]
    fn multiple_matches_per_line_are_retained_in_order() {
        let lines = lines(&["err then err then err"]);
        let result = search(&lines, "err", SearchOptions::default()).unwrap();

        assert_eq!(result.len(), 3);
        let starts: Vec<usize> = result.matches.iter().map(|m| m.start).collect();
        assert_eq!(starts, vec![0, 9, 18]);
    }

    #[test]
    fn case_sensitive_matches_are_a_subset_of_insensitive() {
        let lines = lines(&["Error here", "error there", "ERROR everywhere"]);

        let sensitive = search(
            &lines,
            "error",
            SearchOptions {
                case_sensitive: true,
                ..Default::default()
            },
        )
        .unwrap();
        let insensitive = search(&lines, "error", SearchOptions::default()).unwrap();

        assert_eq!(sensitive.len(), 1);
        assert_eq!(insensitive.len(), 3);
        assert!(insensitive.len() >= sensitive.len());
    }

    #[test]
    fn whole_word_requires_boundaries() {
        let lines = lines(&["error errors preerror", "an error."]);
        let result = search(
            &lines,
            "error",
            SearchOptions {
                whole_word: true,
                ..Default::default()
            },
        )
        .unwrap();

        // "errors" and "preerror" must not match; punctuation counts as a
        // boundary.
        assert_eq!(result.len(), 2);
        assert_eq!(result.matches[0].line_number, 0);
        assert_eq!(result.matches[0].start, 0);
        assert_eq!(result.matches[1].line_number, 1);
        assert_eq!(result.matches[1].start, 3);
    }

    #[test]
    fn literal_mode_escapes_metacharacters() {
        let lines = lines(&["count[0] = 1", "count 0"]);
        let result = search(&lines, "count[0]", SearchOptions::default()).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.matches[0].line_number, 0);
    }

    #[test]
    fn regex_mode_compiles_term_as_pattern() {
        let lines = lines(&["error: disk full", "warn: disk slow"]);
        let result = search(
            &lines,
            r"(error|warn):",
            SearchOptions {
                regex_enabled: true,
                case_sensitive: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(result.len(), 2);
    }

    #[test]
    fn regex_mode_honors_case_flag() {
        let lines = lines(&["Error: one", "error: two"]);
        let options = SearchOptions {
            regex_enabled: true,
            case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(search(&lines, "error", options).unwrap().len(), 1);

        let folded = SearchOptions {
            regex_enabled: true,
            ..Default::default()
        };
        assert_eq!(search(&lines, "error", folded).unwrap().len(), 2);
    }

    #[test]
    fn invalid_regex_is_an_error_not_a_panic() {
        let lines = lines(&["anything"]);
        let err = search(
            &lines,
            "[",
            SearchOptions {
                regex_enabled: true,
                ..Default::default()
            },
        )
        .unwrap_err();

        match err {
            SearchError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "["),
            other => panic!("expected InvalidPattern, got {other:?}"),
        }
    }

    #[test]
    fn empty_term_is_rejected() {
        let lines = lines(&["anything"]);
        assert!(matches!(
            search(&lines, "", SearchOptions::default()),
            Err(SearchError::EmptyTerm)
        ));
    }

    #[test]
    fn no_matches_yields_empty_result() {
        let lines = lines(&["all quiet"]);
        let result = search(&lines, "error", SearchOptions::default()).unwrap();
        assert!(result.is_empty());
    }
}
