//! InlinkAI core — shared store, message bus, error and configuration types.

pub mod bus;
pub mod config;
pub mod error;
pub mod race;
pub mod store;
pub mod types;

pub use bus::{
    LocalBrowser, Message, MessageBus, MessageHandler, Response, Subscription, Tab, TabHost, TabId,
};
pub use config::{DataPaths, ExtensionConfig};
pub use error::{Error, Result};
pub use store::{MemoryStore, SharedStore, StorageChange, ValueChange};
pub use types::*;
