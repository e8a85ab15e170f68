//! # amloop Common Library
//!
//! Shared code for the amloop player crates including:
//! - Error types
//! - Crossfade curve generation
//! - Seconds/frames timing helpers
//! - Configuration file resolution and loading

pub mod config;
pub mod error;
pub mod fade_curves;
pub mod timing;

pub use error::{Error, Result};
pub use fade_curves::{CrossfadeCurve, FadeShape};
