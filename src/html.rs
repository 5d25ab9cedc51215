use scraper::{ElementRef, Selector};

/// Parses a selector that is fixed at compile time.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("selector {css:?} must parse: {err:?}"))
}

/// All text below `element`, whitespace collapsed. Non-breaking spaces count
/// as whitespace.
pub fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first match of `selector` under `root`, if it is not blank.
pub fn first_text(root: ElementRef<'_>, selector: &Selector) -> Option<String> {
    root.select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
