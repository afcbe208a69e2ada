/// Derive topical tags from an item title and link.
///
/// Keywords are lowercase title words longer than three characters with
/// punctuation trimmed and stop words removed; the link's domain (without a
/// leading `www.`) is added as its own tag.
pub fn derive_tags(title: &str, link: Option<&str>) -> Vec<String> {
    let mut tags = extract_keywords(title);
    if let Some(domain) = link.and_then(url::extract_domain) {
        tags.push(domain);
    }

    let mut seen = std::collections::HashSet::new();
    tags.retain(|tag| seen.insert(tag.clone()));
    tags
}

/// Extract important keywords from text, in order of first appearance
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for word in text.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.chars().count() <= 3 || is_stop_word(word) {
            continue;
        }
        if !keywords.iter().any(|k| k == word) {
            keywords.push(word.to_string());
        }
    }

    keywords
}

/// Check if a word is a common stop word
pub fn is_stop_word(word: &str) -> bool {
    matches!(
        word,
        "the" | "and" | "or" | "but" | "in" | "on" | "at" | "to" | "for" | "of" | "with" | "by" |
        "a" | "an" | "is" | "are" | "was" | "were" | "be" | "been" | "have" | "has" | "had" |
        "do" | "does" | "did" | "will" | "would" | "could" | "should" | "may" | "might" | "must" |
        "can" | "this" | "that" | "these" | "those" | "from" | "into" | "about" | "your" |
        "what" | "when" | "show" | "tell" | "launch" | "just" | "than" | "more" | "over" |
        "without" | "after" | "before" | "their" | "there" | "which" | "while"
    )
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Extract domain from URL, dropping a leading `www.`
    pub fn extract_domain(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let domain = url.domain()?;
        Some(domain.strip_prefix("www.").unwrap_or(domain).to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_skip_short_and_stop_words() {
        let keywords = extract_keywords("Show HN: A faster Rust compiler, written in Rust!");
        assert_eq!(keywords, vec!["faster", "rust", "compiler", "written"]);
    }

    #[test]
    fn tags_include_domain() {
        let tags = derive_tags("Postgres query planning", Some("https://www.example.com/post/1"));
        assert_eq!(tags, vec!["postgres", "query", "planning", "example.com"]);
    }

    #[test]
    fn tags_without_url_or_keywords() {
        assert!(derive_tags("Ask HN: why?", None).is_empty());
        assert!(derive_tags("", Some("not a url")).is_empty());
    }
}
