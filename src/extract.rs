use crate::content::{extract_abstract, extract_categories, extract_links, extract_words};
use crate::models::WikiPage;
use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::sync::Arc;

/// Turns one page into terms. Called concurrently from pool workers; an `Err`
/// only fails the page it was called for.
pub type TermExtractor<T> = Arc<dyn Fn(&WikiPage) -> Result<Vec<T>> + Send + Sync>;

/// Wraps a closure as a [`TermExtractor`].
pub fn term_extractor<T, F>(f: F) -> TermExtractor<T>
where
    F: Fn(&WikiPage) -> Result<Vec<T>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Built-in term extractors over wikitext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    /// Targets of `[[wiki links]]`
    Links,
    /// `[[Category:...]]` names
    Categories,
    /// Lowercased words of the lead section
    Words,
}

impl TermKind {
    pub fn extract(self, page: &WikiPage) -> Vec<String> {
        let Some(text) = page.text.as_deref() else {
            return Vec::new();
        };
        match self {
            TermKind::Links => extract_links(text),
            TermKind::Categories => extract_categories(text),
            TermKind::Words => extract_words(&extract_abstract(text)),
        }
    }

    pub fn extractor(self) -> TermExtractor<String> {
        term_extractor(move |page: &WikiPage| Ok(self.extract(page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageType;

    fn page(text: Option<&str>) -> WikiPage {
        WikiPage {
            id: 1,
            title: "Rust".to_string(),
            ns: Some(0),
            page_type: PageType::Article,
            timestamp: None,
            text: text.map(str::to_string),
        }
    }

    const TEXT: &str = "{{Infobox|name=Rust}}\nRust is fast. See [[Python]] and [[C++|C plus plus]].\n\
                        == History ==\nOld [[Mozilla]] days.\n[[Category:Programming languages]]";

    #[test]
    fn links_cover_whole_text() {
        assert_eq!(
            TermKind::Links.extract(&page(Some(TEXT))),
            vec!["Python", "C++", "Mozilla"]
        );
    }

    #[test]
    fn categories() {
        assert_eq!(
            TermKind::Categories.extract(&page(Some(TEXT))),
            vec!["Programming languages"]
        );
    }

    #[test]
    fn words_only_from_lead() {
        let words = TermKind::Words.extract(&page(Some(TEXT)));
        assert!(words.contains(&"rust".to_string()));
        assert!(words.contains(&"python".to_string()));
        assert!(!words.contains(&"mozilla".to_string()));
        assert!(!words.contains(&"infobox".to_string()));
    }

    #[test]
    fn page_without_text_has_no_terms() {
        assert!(TermKind::Links.extract(&page(None)).is_empty());
    }

    #[test]
    fn extractor_wraps_kind() {
        let extractor = TermKind::Categories.extractor();
        assert_eq!(
            extractor(&page(Some(TEXT))).unwrap(),
            vec!["Programming languages"]
        );
    }
}
