//! RiskAlign Client
//!
//! HTTP adapters for the analytics service: a [`RemoteStage`] per derived stage,
//! multipart artifact upload, the natural-language query endpoint and
//! provider discovery, all behind the traits in `riskalign-core`.

mod client;
mod error;
mod stages;
pub mod wire;

pub use client::{AnalyticsClient, PROVIDER_HEADER};
pub use error::{classify_status, error_message, ClientError};
pub use stages::RemoteStage;
