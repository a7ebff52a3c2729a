use regex::Regex;
use std::sync::OnceLock;

/// What a recognized link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Single,
    Collection,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Single => "video",
            LinkKind::Collection => "playlist",
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Watch URLs, shorts and youtu.be short-links
fn single_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?.*v=|shorts/)|youtu\.be/)[\w\-]+",
        )
        .expect("valid single item regex")
    })
}

// Anything carrying a list= parameter
fn collection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:playlist|watch)|youtu\.be/[\w\-]+)\?.*list=[\w\-]+",
        )
        .expect("valid collection regex")
    })
}

/// Check whether the text contains any kind of YouTube link
pub fn is_recognized_link(text: &str) -> bool {
    single_item_re().is_match(text) || collection_re().is_match(text)
}

/// Check whether the text contains a playlist link
///
/// A watch URL that also carries a `list=` parameter counts as a playlist.
pub fn is_collection_link(text: &str) -> bool {
    collection_re().is_match(text)
}

/// Classify the text, or `None` when it is not a recognized link
pub fn classify(text: &str) -> Option<LinkKind> {
    if is_collection_link(text) {
        Some(LinkKind::Collection)
    } else if is_recognized_link(text) {
        Some(LinkKind::Single)
    } else {
        None
    }
}
