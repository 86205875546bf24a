//! The Matilda conversation orchestrator.
//!
//! An [`Assistant`] owns one session's conversation and drives each turn:
//!
//! 1. **Classify** the input (image request or text)
//! 2. **Store** the user message and render context for the provider
//! 3. **Generate** through the [`GenerationAdapter`](matilda_providers::GenerationAdapter),
//!    streaming fragments to a sink when enabled
//! 4. **Clean** leaked role prefixes and store the reply
//!
//! Cancellation, style changes and clearing are plain method calls; hosts
//! (the CLI and the gateway) map their user-facing commands onto them.

pub mod clean;
pub mod image_intent;
pub mod orchestrator;
pub mod prompt;
pub mod stream_event;

pub use clean::clean_response;
pub use orchestrator::{Assistant, AssistantSettings, CANCEL_NOTICE, Phase, Reply};
pub use stream_event::AssistantEvent;

#[cfg(test)]
pub(crate) mod test_helpers;
