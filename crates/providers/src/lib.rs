//! Provider implementations for Matilda.
//!
//! Text providers implement `matilda_core::TextProvider`, image providers
//! implement `matilda_core::ImageProvider`. [`GenerationAdapter`] puts both
//! chains behind one seam; [`build_from_config`] wires it from `AppConfig`.

pub mod adapter;
pub mod completions;
pub mod extract;
pub mod fallback;
pub mod image;
pub mod router;

pub use adapter::{FragmentStream, GenerationAdapter};
pub use completions::CompletionsProvider;
pub use fallback::ProviderChain;
pub use image::{ImageChain, ImageOutcome};
pub use router::build_from_config;
