//! Subject pattern matching.

/// Payloads that know their subject.
pub trait HasSubject {
    fn subject(&self) -> &str;
}

/// Check if a subject matches a pattern.
///
/// Tokens are separated by `.`:
/// - `*` matches exactly one token
/// - `>` matches one or more trailing tokens and must be last
///
/// ```
/// use blockbase_events::matches_pattern;
///
/// assert!(matches_pattern("block.*", "block.patched"));
/// assert!(matches_pattern(">", "block.deleted"));
/// assert!(!matches_pattern("block.inserted", "block.deleted"));
/// ```
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.').peekable();
    let mut subject_tokens = subject.split('.');

    while let Some(token) = pattern_tokens.next() {
        let Some(subject_token) = subject_tokens.next() else {
            return false;
        };
        match token {
            ">" => return pattern_tokens.peek().is_none(),
            "*" => {}
            exact if exact != subject_token => return false,
            _ => {}
        }
    }
    subject_tokens.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(matches_pattern("block.inserted", "block.inserted"));
        assert!(!matches_pattern("block.inserted", "block.patched"));
        assert!(!matches_pattern("block", "block.inserted"));
        assert!(!matches_pattern("block.inserted.x", "block.inserted"));
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(matches_pattern("block.*", "block.deleted"));
        assert!(matches_pattern("*.deleted", "block.deleted"));
        assert!(!matches_pattern("block.*", "block.fields.changed"));
        assert!(!matches_pattern("block.*", "block"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(matches_pattern("block.>", "block.deleted"));
        assert!(matches_pattern("block.>", "block.fields.changed"));
        assert!(!matches_pattern("block.>", "block"));
        assert!(!matches_pattern("block.>.x", "block.a.x"));
        assert!(matches_pattern(">", "anything.at.all"));
    }
}
