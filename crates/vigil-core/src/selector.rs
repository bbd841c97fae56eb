//! Selector descriptor resolution
//!
//! Recorded steps store targets as prefixed descriptors (`css=`, `id=`,
//! `xpath=`). Resolution is a pure string transform; nothing here touches
//! a live page.

const CSS_PREFIX: &str = "css=";
const ID_PREFIX: &str = "id=";
const XPATH_PREFIX: &str = "xpath=";

/// Translate a stored target descriptor into a lookup expression.
///
/// Unprefixed input passes through untouched so the session's lookup engine
/// can auto-detect it. Empty input resolves to an empty string, which callers
/// must treat as a resolution failure.
pub fn resolve(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    if let Some(css) = raw.strip_prefix(CSS_PREFIX) {
        css.to_string()
    } else if let Some(id) = raw.strip_prefix(ID_PREFIX) {
        format!("#{}", id)
    } else if let Some(xpath) = raw.strip_prefix(XPATH_PREFIX) {
        xpath.to_string()
    } else {
        raw.to_string()
    }
}

/// Whether a resolved expression should be looked up as XPath
pub fn looks_like_xpath(resolved: &str) -> bool {
    resolved.starts_with('/') || resolved.starts_with("..") || resolved.starts_with("(/")
}
