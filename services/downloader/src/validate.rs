//! YouTube URL allow-list.
//!
//! LEARNING: `LazyLock` compiles the regexes once, on first use, and shares
//! them across threads. Compiling a regex on every request would be wasteful.
use regex::Regex;
use std::sync::LazyLock;

/// Every pattern starts with `^` but none ends with `$`: anything after a
/// recognised prefix is accepted.
const PATTERNS: [&str; 4] = [
    r"^https?://(?:www\.)?youtube\.com/watch\?v=[\w-]+",
    r"^https?://(?:www\.)?youtube\.com/shorts/[\w-]+",
    r"^https?://youtu\.be/[\w-]+",
    r"^https?://(?:www\.)?youtube\.com/embed/[\w-]+",
];

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Returns true if `url` starts with one of the supported YouTube URL shapes.
pub fn is_valid_url(url: &str) -> bool {
    URL_PATTERNS.iter().any(|re| re.is_match(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(URL_PATTERNS.len(), PATTERNS.len());
    }

    #[test]
    fn test_accepts_supported_shapes() {
        assert!(is_valid_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_valid_url("https://youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_valid_url("http://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_valid_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_valid_url("https://www.youtube.com/shorts/abc_DEF-123"));
        assert!(is_valid_url("https://www.youtube.com/embed/dQw4w9WgXcQ"));
    }

    #[test]
    fn test_rejects_other_urls() {
        assert!(!is_valid_url("https://invalid-url.com"));
        assert!(!is_valid_url(""));
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url("https://www.youtube.com/watch?v="));
        assert!(!is_valid_url("https://vimeo.com/12345"));
        assert!(!is_valid_url("ftp://youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn test_match_is_anchored_at_start_only() {
        // Leading garbage is rejected...
        assert!(!is_valid_url(" https://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_valid_url("https://evil.example/?u=https://youtu.be/dQw4w9WgXcQ"));
        // ...but a trailing suffix after a valid prefix passes.
        assert!(is_valid_url("https://youtu.be/dQw4w9WgXcQ/../../etc/passwd"));
        assert!(is_valid_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=x y z"));

        // Stricter full-string variant, not enabled:
        // let strict = Regex::new(r"^https?://youtu\.be/[\w-]+$").unwrap();
        // assert!(!strict.is_match("https://youtu.be/dQw4w9WgXcQ/../../etc/passwd"));
    }
}
