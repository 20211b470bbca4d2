//! Profile scraper — the per-field selector chains for the target site.
//!
//! Chains run in declaration order, so later fields may depend on earlier
//! ones (the picture lookup uses the first name, the position falls back to
//! the headline).

use inlink_core::{ProfileData, ProfileField};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::selectors::{element_text, FieldChain, Lookup};

static POSITION_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+(?:at|@|\|)\s+").unwrap());
static LEADING_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+").unwrap());
static STAT_COUNTERS: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse(r#"span[class*="t-bold"], .text-body-small strong"#).ok());

const ABOUT_MIN_CHARS: usize = 50;

fn about_text(text: &str) -> bool {
    text.chars().count() > ABOUT_MIN_CHARS && !text.contains("Show all") && !text.contains("See more")
}

fn profile_picture(src: &str) -> bool {
    src.contains("profile")
}

fn position_text(text: &str) -> bool {
    !text.contains('@')
}

fn location_text(text: &str) -> bool {
    let len = text.chars().count();
    !text.chars().any(|c| c.is_ascii_digit())
        && !text.contains("connections")
        && !text.contains("followers")
        && len > 2
        && len < 50
}

/// "Title at Company" / "Title @ Company" / "Title | Company" → "Title".
fn position_from_headline(headline: &str) -> Option<String> {
    let title = POSITION_SPLIT.split(headline).next()?.trim();
    if title.is_empty() || title == headline.trim() {
        None
    } else {
        Some(title.to_string())
    }
}

/// A bold counter whose parent text names `label` (e.g. "500+ connections").
/// When several qualify, the last one in document order wins.
fn stat_counter(document: &Html, label: &str) -> Option<String> {
    let counters = STAT_COUNTERS.as_ref()?;
    document
        .select(counters)
        .filter_map(|counter| {
            let parent_text = counter
                .parent()
                .and_then(ElementRef::wrap)
                .map(|p| element_text(&p).to_lowercase())
                .unwrap_or_default();
            let text = element_text(&counter);
            (parent_text.contains(label) && LEADING_COUNT.is_match(&text)).then_some(text)
        })
        .last()
}

/// Picture whose alt text mentions the already-resolved first name.
fn picture_by_first_name(document: &Html, partial: &ProfileData) -> Option<String> {
    let first_name = partial.full_name.as_deref()?.split_whitespace().next()?;
    let css = format!(r#"img[alt*="{}"]"#, first_name.replace('"', ""));
    let selector = Selector::parse(&css).ok()?;
    let element = document.select(&selector).next()?;
    element
        .value()
        .attr("src")
        .filter(|src| profile_picture(src))
        .map(str::to_string)
}

/// Scrapes a profile page into `ProfileData`.
#[derive(Debug)]
pub struct ProfileScraper {
    chains: Vec<FieldChain>,
}

impl Default for ProfileScraper {
    fn default() -> Self {
        Self::new(default_chains())
    }
}

impl ProfileScraper {
    pub fn new(chains: Vec<FieldChain>) -> Self {
        Self { chains }
    }

    pub fn chains(&self) -> &[FieldChain] {
        &self.chains
    }

    /// Scrape a full HTML document.
    pub fn scrape(&self, html: &str) -> ProfileData {
        let document = Html::parse_document(html);
        self.scrape_document(&document)
    }

    pub fn scrape_document(&self, document: &Html) -> ProfileData {
        let mut data = ProfileData::default();
        for chain in &self.chains {
            if let Some(value) = chain.resolve(document, &data) {
                data.set(chain.field, value);
            }
        }
        debug!("Scraped {} profile fields", data.field_count());
        data
    }
}

fn default_chains() -> Vec<FieldChain> {
    vec![
        FieldChain::new(ProfileField::FullName)
            .then(Lookup::text("h1.inline.t-24.v-align-middle.break-words"))
            .then(Lookup::text(r#"h1[class*="break-words"]"#))
            .then(Lookup::text(r#"h1[class*="t-24"]"#))
            .then(Lookup::text(".pv-text-details__left-panel h1")),
        FieldChain::new(ProfileField::Headline)
            .then(Lookup::text(
                "div.text-body-medium.break-words[data-generated-suggestion-target]",
            ))
            .then(Lookup::text(".text-body-medium.break-words"))
            .then(Lookup::text(".pv-text-details__left-panel .text-body-medium")),
        FieldChain::new(ProfileField::Company)
            .then(Lookup::text(
                r#"button[aria-label*="Current company"] .hoverable-link-text.break-words"#,
            ))
            .then(Lookup::text(
                r#"button[aria-label*="company"] span[class*="hoverable-link-text"]"#,
            )),
        FieldChain::new(ProfileField::AboutSection)
            .then(
                Lookup::any_text_where(
                    "#about ~ * .pvs-list__outer-container .visually-hidden",
                    about_text,
                )
                .when_present("#about"),
            )
            .then(
                Lookup::any_text_where(r#"#about ~ * span[aria-hidden="true"]"#, about_text)
                    .when_present("#about"),
            )
            .then(Lookup::any_text_where("#about + * .full-width", about_text).when_present("#about"))
            .then(
                Lookup::any_text_where(".pv-shared-text-with-see-more .full-width span", about_text)
                    .when_present("#about"),
            ),
        FieldChain::new(ProfileField::ProfilePictureUrl)
            .then(Lookup::attr_where(
                "img.profile-photo-edit__preview",
                "src",
                profile_picture,
            ))
            .then(Lookup::attr_where(".pv-top-card__photo img", "src", profile_picture))
            .then(Lookup::new("img[alt*=<first name>]", picture_by_first_name)),
        FieldChain::new(ProfileField::CurrentPosition)
            .then(Lookup::first_text_where(
                r#"button[aria-label*="Current company"] .mr1"#,
                position_text,
            ))
            .then(Lookup::first_text_where(
                ".pv-text-details__left-panel .text-body-medium",
                position_text,
            ))
            .then(Lookup::first_text_where(
                "#experience ~ * .mr1.hoverable-link-text",
                position_text,
            ))
            .then(Lookup::new("headline prefix", |_, partial| {
                partial.headline.as_deref().and_then(position_from_headline)
            })),
        FieldChain::new(ProfileField::Location)
            .then(Lookup::any_text_where(
                ".pv-text-details__left-panel .text-body-small",
                location_text,
            ))
            .then(Lookup::any_text_where(
                ".pv-top-card--list-bullet .text-body-small",
                location_text,
            )),
        FieldChain::new(ProfileField::Connections)
            .then(Lookup::new("connections counter", |doc, _| stat_counter(doc, "connections"))),
        FieldChain::new(ProfileField::Followers)
            .then(Lookup::new("followers counter", |doc, _| stat_counter(doc, "followers"))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PROFILE: &str = r#"
        <html><body>
          <main>
            <h1 class="inline t-24 v-align-middle break-words">Ada Lovelace</h1>
            <div class="text-body-medium break-words" data-generated-suggestion-target="x">
              Analyst at Analytical Engines Ltd
            </div>
            <button aria-label="Current company: Analytical Engines Ltd">
              <span class="hoverable-link-text break-words">Analytical Engines Ltd</span>
            </button>
            <div class="pv-top-card--list-bullet">
              <span class="text-body-small">London, England</span>
            </div>
            <ul>
              <li class="text-body-small"><span class="t-bold">500+</span> connections</li>
              <li class="text-body-small"><span class="t-bold">1,204</span> followers</li>
            </ul>
            <img class="profile-photo-edit__preview" src="https://media.example/profile-displayphoto-ada.jpg">
            <section>
              <div id="about"></div>
              <div>
                <span aria-hidden="true">See more</span>
                <span aria-hidden="true">I write notes on the Analytical Engine and think about what such machines could compute beyond numbers.</span>
              </div>
            </section>
          </main>
        </body></html>
    "#;

    #[test]
    fn test_full_profile() {
        let data = ProfileScraper::default().scrape(FULL_PROFILE);
        assert_eq!(data.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(data.headline.as_deref(), Some("Analyst at Analytical Engines Ltd"));
        assert_eq!(data.company.as_deref(), Some("Analytical Engines Ltd"));
        assert_eq!(data.current_position.as_deref(), Some("Analyst"));
        assert_eq!(data.location.as_deref(), Some("London, England"));
        assert_eq!(data.connections.as_deref(), Some("500+"));
        assert_eq!(data.followers.as_deref(), Some("1,204"));
        assert_eq!(
            data.profile_picture_url.as_deref(),
            Some("https://media.example/profile-displayphoto-ada.jpg")
        );
        assert!(data
            .about_section
            .as_deref()
            .unwrap()
            .starts_with("I write notes"));
    }

    #[test]
    fn test_only_second_name_candidate_matches() {
        let html = r#"<h1 class="break-words headline-name">Grace Hopper</h1>"#;
        let data = ProfileScraper::default().scrape(html);
        assert_eq!(data.full_name.as_deref(), Some("Grace Hopper"));
    }

    #[test]
    fn test_nothing_matches() {
        let data = ProfileScraper::default().scrape("<html><body><p>Sign in</p></body></html>");
        assert!(data.is_empty());
    }

    #[test]
    fn test_about_requires_anchor() {
        let html = r#"
            <div class="pv-shared-text-with-see-more"><div class="full-width">
              <span>A long enough paragraph that would otherwise qualify as an about section text.</span>
            </div></div>
        "#;
        let data = ProfileScraper::default().scrape(html);
        assert_eq!(data.about_section, None);
    }

    #[test]
    fn test_location_rejects_stats() {
        let html = r#"
            <div class="pv-text-details__left-panel">
              <span class="text-body-small">500 connections</span>
              <span class="text-body-small">Paris</span>
            </div>
        "#;
        let data = ProfileScraper::default().scrape(html);
        assert_eq!(data.location.as_deref(), Some("Paris"));
    }

    #[test]
    fn test_last_stat_counter_wins() {
        let html = r#"
            <ul>
              <li class="text-body-small"><span class="t-bold">12</span> mutual connections</li>
              <li class="text-body-small"><span class="t-bold">500+</span> connections</li>
            </ul>
        "#;
        let document = Html::parse_document(html);
        assert_eq!(stat_counter(&document, "connections").as_deref(), Some("500+"));
        assert_eq!(stat_counter(&document, "followers"), None);
    }

    #[test]
    fn test_picture_by_first_name() {
        let html = r#"
            <h1 class="t-24">Alan Turing</h1>
            <img alt="Alan Turing" src="https://media.example/profile-alan.jpg">
        "#;
        let data = ProfileScraper::default().scrape(html);
        assert_eq!(
            data.profile_picture_url.as_deref(),
            Some("https://media.example/profile-alan.jpg")
        );
    }

    #[test]
    fn test_position_from_headline() {
        assert_eq!(position_from_headline("CTO | Acme").as_deref(), Some("CTO"));
        assert_eq!(position_from_headline("Engineer @ Acme").as_deref(), Some("Engineer"));
        assert_eq!(position_from_headline("Just a headline"), None);
    }
}
