//! Pin records and the URL patterns used to find a replacement tab once the
//! pinned tab is gone.

pub mod resolver;

pub use resolver::{PinResolver, ResolvedPin};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::host::{Tab, TabId, WindowId};
use crate::keys::KeyRef;

/// How wide a pin's URL pattern is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinScope {
    /// Any page of the tab's origin.
    #[default]
    Origin,
    /// Exactly the tab's origin and path.
    Page,
}

/// Glob over `origin + path` of a tab URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlPattern(String);

impl UrlPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn for_url(url: &str, scope: PinScope) -> Self {
        let Some((origin, path)) = split_origin(url) else {
            return Self(glob::Pattern::escape(url));
        };
        let origin = glob::Pattern::escape(&origin);
        match scope {
            PinScope::Origin => Self(format!("{origin}/*")),
            PinScope::Page => Self(format!("{origin}{}", glob::Pattern::escape(&path))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Query and fragment of `url` are ignored.
    pub fn matches(&self, url: &str) -> bool {
        let candidate = match split_origin(url) {
            Some((origin, path)) => format!("{origin}{path}"),
            None => url.to_string(),
        };
        match glob::Pattern::new(&self.0) {
            Ok(pattern) => pattern.matches(&candidate),
            Err(e) => {
                tracing::warn!("Invalid url pattern {:?}: {}", self.0, e);
                false
            }
        }
    }
}

/// `scheme://host[:port]` and path, for URLs that have a host.
fn split_origin(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Some((origin, parsed.path().to_string()))
}

/// Persisted record for one slot. Identity fields are only present while the
/// pin is bound to a live tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub title: String,
    pub url: String,
    pub url_pattern: UrlPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
}

impl Pin {
    /// Snapshot of `tab` at pin time.
    pub fn from_tab(tab: &Tab, scope: PinScope) -> Self {
        Self {
            tab_id: Some(tab.id),
            window_id: Some(tab.window_id),
            index: Some(tab.index),
            title: tab.title.clone(),
            url: tab.url.clone(),
            url_pattern: UrlPattern::for_url(&tab.url, scope),
            fav_icon_url: tab.fav_icon_url.clone(),
        }
    }

    pub fn is_dangling(&self) -> bool {
        self.tab_id.is_none()
    }

    pub fn is_bound_to(&self, tab: &Tab) -> bool {
        self.tab_id == Some(tab.id)
    }

    /// Binds the pin to `tab`, keeping title, url, pattern and favicon.
    /// Returns whether anything changed.
    pub fn attach(&mut self, tab: &Tab) -> bool {
        let before = (self.tab_id, self.window_id, self.index);
        self.tab_id = Some(tab.id);
        self.window_id = Some(tab.window_id);
        self.index = Some(tab.index);
        before != (self.tab_id, self.window_id, self.index)
    }

    /// Drops identity fields. Returns whether the pin was bound.
    pub fn detach(&mut self) -> bool {
        let was_bound = !self.is_dangling();
        self.tab_id = None;
        self.window_id = None;
        self.index = None;
        was_bound
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusOptions {
    /// Bring the tab next to the current one.
    pub summon: bool,
    /// Open a fresh tab even if the pinned one is alive.
    pub recreate: bool,
    /// Navigate the tab back to the pinned url.
    pub reset: bool,
}

/// A pin together with the slot that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinEntry {
    pub key_ref: KeyRef,
    pub pin: Pin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn tab(url: &str) -> Tab {
        Tab {
            id: 7,
            window_id: 2,
            index: 3,
            title: "Docs".to_string(),
            url: url.to_string(),
            fav_icon_url: Some("https://docs.test/favicon.ico".to_string()),
            active: true,
        }
    }

    #[rstest]
    #[case("https://docs.test/guide/intro?x=1", PinScope::Origin, "https://docs.test/*")]
    #[case("https://docs.test/guide/intro?x=1", PinScope::Page, "https://docs.test/guide/intro")]
    #[case("http://localhost:8080/a", PinScope::Origin, "http://localhost:8080/*")]
    #[case("chrome://newtab/", PinScope::Origin, "chrome://newtab/*")]
    #[case("about:blank", PinScope::Page, "about:blank")]
    fn test_pattern_for_url(#[case] url: &str, #[case] scope: PinScope, #[case] expected: &str) {
        assert_eq!(UrlPattern::for_url(url, scope).as_str(), expected);
    }

    #[test]
    fn test_pattern_escapes_glob_characters() {
        let pattern = UrlPattern::for_url("https://docs.test/a*b", PinScope::Page);
        assert!(pattern.matches("https://docs.test/a*b"));
        assert!(!pattern.matches("https://docs.test/axxb"));
    }

    #[rstest]
    #[case("https://docs.test/", true)]
    #[case("https://docs.test/deep/page#frag", true)]
    #[case("https://other.test/", false)]
    #[case("http://docs.test/", false)]
    fn test_origin_pattern_matches(#[case] url: &str, #[case] expected: bool) {
        let pattern = UrlPattern::for_url("https://docs.test/start", PinScope::Origin);
        assert_eq!(pattern.matches(url), expected);
    }

    #[test]
    fn test_page_pattern_ignores_query() {
        let pattern = UrlPattern::for_url("https://docs.test/guide", PinScope::Page);
        assert!(pattern.matches("https://docs.test/guide?page=2"));
        assert!(!pattern.matches("https://docs.test/guide/more"));
    }

    #[test]
    fn test_from_tab_and_detach() {
        let mut pin = Pin::from_tab(&tab("https://docs.test/guide"), PinScope::Origin);
        assert_eq!(pin.tab_id, Some(7));
        assert_eq!(pin.url_pattern.as_str(), "https://docs.test/*");
        assert!(!pin.is_dangling());

        assert!(pin.detach());
        assert!(pin.is_dangling());
        assert!(!pin.detach());
        assert_eq!(pin.title, "Docs");
    }

    #[test]
    fn test_attach_keeps_user_fields() {
        let mut pin = Pin::from_tab(&tab("https://docs.test/guide"), PinScope::Origin);
        pin.detach();
        let mut other = tab("https://docs.test/elsewhere");
        other.id = 11;
        other.title = "Elsewhere".to_string();

        assert!(pin.attach(&other));
        assert_eq!(pin.tab_id, Some(11));
        assert_eq!(pin.title, "Docs");
        assert_eq!(pin.url, "https://docs.test/guide");
        assert!(!pin.attach(&other));
    }

    #[test]
    fn test_pin_serialization_skips_identity_when_dangling() {
        let mut pin = Pin::from_tab(&tab("https://docs.test/"), PinScope::Page);
        pin.detach();
        let json = serde_json::to_value(&pin).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Docs",
                "url": "https://docs.test/",
                "urlPattern": "https://docs.test/",
                "favIconUrl": "https://docs.test/favicon.ico",
            })
        );
    }
}
