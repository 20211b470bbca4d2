//! Selector fallback chains.
//!
//! A `FieldChain` is an ordered list of `Lookup`s for one profile field. Each
//! lookup is a pure function of the document and the fields resolved so far;
//! the chain resolves to the first lookup that yields a value.

use inlink_core::{ProfileData, ProfileField};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

type LookupFn = dyn Fn(&Html, &ProfileData) -> Option<String> + Send + Sync;

/// One candidate strategy for a field.
pub struct Lookup {
    label: String,
    run: Box<LookupFn>,
}

impl Lookup {
    pub fn new(
        label: impl Into<String>,
        run: impl Fn(&Html, &ProfileData) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    /// Text of the first element matching `css`, if non-empty.
    pub fn text(css: &str) -> Self {
        Self::first_text_where(css, |_| true)
    }

    /// Text of the first element matching `css`, if non-empty and accepted.
    pub fn first_text_where(css: &str, accept: fn(&str) -> bool) -> Self {
        let selector = parse(css);
        Self::new(css, move |doc, _| {
            let element = doc.select(selector.as_ref()?).next()?;
            Some(element_text(&element)).filter(|t| !t.is_empty() && accept(t))
        })
    }

    /// Text of any element matching `css` that is non-empty and accepted.
    pub fn any_text_where(css: &str, accept: fn(&str) -> bool) -> Self {
        let selector = parse(css);
        Self::new(css, move |doc, _| {
            doc.select(selector.as_ref()?)
                .map(|e| element_text(&e))
                .find(|t| !t.is_empty() && accept(t))
        })
    }

    /// Attribute of the first element matching `css`, if accepted.
    pub fn attr_where(css: &str, attr: &'static str, accept: fn(&str) -> bool) -> Self {
        let selector = parse(css);
        Self::new(format!("{}[{}]", css, attr), move |doc, _| {
            let element = doc.select(selector.as_ref()?).next()?;
            element
                .value()
                .attr(attr)
                .map(str::trim)
                .filter(|v| !v.is_empty() && accept(v))
                .map(str::to_string)
        })
    }

    /// Only run this lookup when `css` matches something in the document.
    pub fn when_present(self, css: &str) -> Self {
        let gate = parse(css);
        let Lookup { label, run } = self;
        Self::new(label, move |doc, partial| {
            doc.select(gate.as_ref()?).next()?;
            run(doc, partial)
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn run(&self, document: &Html, partial: &ProfileData) -> Option<String> {
        (self.run)(document, partial)
    }
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Lookup").field(&self.label).finish()
    }
}

/// Ordered candidates for a single field.
#[derive(Debug)]
pub struct FieldChain {
    pub field: ProfileField,
    lookups: Vec<Lookup>,
}

impl FieldChain {
    pub fn new(field: ProfileField) -> Self {
        Self {
            field,
            lookups: Vec::new(),
        }
    }

    pub fn then(mut self, lookup: Lookup) -> Self {
        self.lookups.push(lookup);
        self
    }

    /// Resolve by first success. No match leaves the field unset.
    pub fn resolve(&self, document: &Html, partial: &ProfileData) -> Option<String> {
        let found = self.lookups.iter().find_map(|lookup| {
            lookup
                .run(document, partial)
                .map(|value| (lookup.label(), value))
        });
        match found {
            Some((label, value)) => {
                debug!("{}: matched {}", self.field, label);
                Some(value)
            }
            None => {
                debug!("{}: no candidate matched", self.field);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }
}

/// Trimmed text content of an element, like the DOM's `textContent`.
pub fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn parse(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Skipping invalid selector {:?}: {:?}", css, e);
            None
        }
    }
}
