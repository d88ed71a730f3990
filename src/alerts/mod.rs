//! Alerting: classification of problem records into typed exceptions,
//! rendering into notification text and delivery to configured targets.

pub mod config;
pub mod event;
pub mod notifier;
pub mod renderer;

pub use config::{AlertSettings, NotifyTarget};
pub use event::{Event, Exception};
pub use notifier::{Notifier, NotifierError};
pub use renderer::{Findings, Renderer};
