//! Conversation style profiles.
//!
//! A style pairs sampling parameters with a personality fragment that is
//! spliced into the system prompt. The table is fixed at compile time.

use serde::Serialize;

/// Named sampling + personality preset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StyleProfile {
    pub name: &'static str,
    pub temperature: f32,
    pub top_p: f32,
    pub prompt_fragment: &'static str,
}

const PROFILES: &[StyleProfile] = &[
    StyleProfile {
        name: "professional",
        temperature: 0.6,
        top_p: 0.9,
        prompt_fragment: "You are professional, precise, and formal in your responses. \
            You prioritize accuracy and clarity. \
            You use proper terminology and avoid casual language. \
            You maintain a helpful but somewhat formal tone.",
    },
    StyleProfile {
        name: "casual",
        temperature: 0.8,
        top_p: 0.95,
        prompt_fragment: "You are casual, friendly, and conversational in your responses. \
            You use relaxed language and occasional humor when appropriate. \
            You're warm and approachable, like chatting with a friend. \
            You use simpler explanations and everyday examples.",
    },
    StyleProfile {
        name: "balanced",
        temperature: 0.7,
        top_p: 0.9,
        prompt_fragment: "You balance professionalism with approachability. \
            You adapt your tone to match the user's style and the context of the conversation. \
            You're helpful, clear, and friendly without being overly formal or casual.",
    },
    StyleProfile {
        name: "creative",
        temperature: 0.9,
        top_p: 0.98,
        prompt_fragment: "You are creative, imaginative, and engaging in your responses. \
            You think outside the box and offer unique perspectives and ideas. \
            You use vivid language, metaphors, and storytelling techniques when appropriate. \
            You're enthusiastic and inspirational.",
    },
    StyleProfile {
        name: "concise",
        temperature: 0.5,
        top_p: 0.85,
        prompt_fragment: "You are brief and to the point. \
            You prioritize efficiency and clarity in your responses. \
            You avoid unnecessary details unless specifically asked. \
            You use short sentences and paragraphs.",
    },
];

/// Used for any name not in the table.
pub const FALLBACK_PROFILE: StyleProfile = StyleProfile {
    name: "default",
    temperature: 0.7,
    top_p: 0.9,
    prompt_fragment: "You are helpful, friendly, and knowledgeable.",
};

impl StyleProfile {
    /// Look up a profile by exact (case-sensitive) name.
    ///
    /// Unknown names resolve to [`FALLBACK_PROFILE`]; this never fails.
    pub fn resolve(name: &str) -> &'static StyleProfile {
        PROFILES
            .iter()
            .find(|p| p.name == name)
            .unwrap_or(&FALLBACK_PROFILE)
    }

    /// All named profiles, in display order.
    pub fn profiles() -> &'static [StyleProfile] {
        PROFILES
    }

    pub fn is_known(name: &str) -> bool {
        PROFILES.iter().any(|p| p.name == name)
    }
}
