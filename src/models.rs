use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageType {
    Article,
    Redirect(String),
    Special,
}

/// One `<page>` record of a dump. Moved between pipeline stages, never shared.
#[derive(Debug, Clone)]
pub struct WikiPage {
    pub id: u32,
    pub title: String,
    pub ns: Option<i32>,
    pub page_type: PageType,
    pub timestamp: Option<String>,
    pub text: Option<String>,
}

impl WikiPage {
    pub fn is_article(&self) -> bool {
        matches!(self.page_type, PageType::Article)
    }
}

/// A term with its final count, as exported after optimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
    pub term: String,
    pub count: u64,
}
