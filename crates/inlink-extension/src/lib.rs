//! InlinkAI extension contexts.
//!
//! The background coordinator, content agent and popup controller share no
//! memory. They talk through the injected `SharedStore` and `MessageBus`, the
//! way the browser's extension contexts do.

pub mod background;
pub mod content;
pub mod page;
pub mod popup;

pub use background::{BackgroundCoordinator, BackgroundHandle, InstallReason, TabStatus};
pub use content::{ContentAgent, ExtractionOutcome};
pub use page::{LocalPage, PageHost, StatusKind};
pub use popup::{
    ConnectStep, ExtractionView, OtpEntry, OtpInput, PopupController, PopupView, StatusLine,
};
