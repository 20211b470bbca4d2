//! Page identity — "is matching site", "is profile page", "is own profile".

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

static EDIT_MARKERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"[data-test-id="profile-edit-button"]"#,
        r#"button[aria-label*="Edit"]"#,
    ]
    .iter()
    .filter_map(|css| Selector::parse(css).ok())
    .collect()
});

/// Whether `address` is served from `domain` or one of its subdomains.
pub fn is_matching_site(address: &str, domain: &str) -> bool {
    match Url::parse(address) {
        Ok(url) => url
            .host_str()
            .map(|host| host == domain || host.ends_with(&format!(".{}", domain)))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Profile pages live under `/in/<slug>` or `/me`.
pub fn is_profile_page(address: &str) -> bool {
    match Url::parse(address) {
        Ok(url) => {
            let path = url.path();
            path.starts_with("/in/") || path == "/me" || path.starts_with("/me/")
        }
        Err(_) => false,
    }
}

/// Heuristic for "this is the signed-in user's own profile".
pub fn is_own_profile(address: &str, document: &Html) -> bool {
    let by_address = Url::parse(address)
        .map(|url| {
            let path = url.path();
            path == "/me" || path.starts_with("/me/") || path.contains("/edit/")
        })
        .unwrap_or(false);

    by_address
        || EDIT_MARKERS
            .iter()
            .any(|marker| document.select(marker).next().is_some())
}

/// Derived per-page context. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageIdentity {
    pub matching_site: bool,
    pub profile_page: bool,
    pub own_profile: bool,
}

impl PageIdentity {
    pub fn inspect(address: &str, html: &str, domain: &str) -> Self {
        let matching_site = is_matching_site(address, domain);
        if !matching_site {
            return Self::default();
        }
        let document = Html::parse_document(html);
        Self {
            matching_site,
            profile_page: is_profile_page(address),
            own_profile: is_own_profile(address, &document),
        }
    }

    /// The affordance is offered only on the user's own profile page.
    pub fn wants_affordance(&self) -> bool {
        self.matching_site && self.profile_page && self.own_profile
    }
}
