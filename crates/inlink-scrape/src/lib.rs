//! Profile scraping — page identity checks and per-field selector fallback chains.
//!
//! Everything here is best-effort: a selector that matches nothing leaves the
//! field unset, and an unparsable selector is skipped.

pub mod identity;
pub mod profile;
pub mod selectors;

pub use identity::PageIdentity;
pub use profile::ProfileScraper;
pub use selectors::{FieldChain, Lookup};
