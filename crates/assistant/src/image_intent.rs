//! Image request detection and prompt refinement.

/// Case-insensitive substrings that mark a request as an image request.
const IMAGE_PHRASES: &[&str] = &[
    "generate an image",
    "create an image",
    "make an image",
    "draw a picture",
    "draw an image",
    "generate a picture",
    "show me an image",
    "create a picture",
    "generate a drawing",
    "can you make an image",
    "can you create an image",
    "can you draw",
    "could you generate an image",
    "image of",
    "picture of",
    "generate art",
    "create art",
];

/// Tried in order; the text after the first usable match becomes the prompt.
const TRIGGERS: &[&str] = &[
    "image of",
    "picture of",
    "draw",
    "generate",
    "create",
    "make",
    "show me",
];

const ARTICLES: &[&str] = &["a", "an", "the"];

pub const QUALITY_SUFFIX: &str = ", high quality, detailed, realistic, 4k";

pub fn is_image_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    IMAGE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Turn a request into an image prompt.
///
/// "generate an image of a red fox" becomes
/// "red fox, high quality, detailed, realistic, 4k".
pub fn refine_prompt(text: &str) -> String {
    for trigger in TRIGGERS {
        let Some(end) = find_word(text, trigger) else {
            continue;
        };
        let subject = strip_articles(text[end..].trim());
        if !subject.is_empty() {
            return format!("{subject}{QUALITY_SUFFIX}");
        }
    }
    format!("{}{QUALITY_SUFFIX}", text.trim())
}

/// Byte offset just past the first whole-word, case-insensitive match of
/// the ASCII `needle` in `text`.
fn find_word(text: &str, needle: &str) -> Option<usize> {
    let mut prev: Option<char> = None;
    for (start, c) in text.char_indices() {
        let bounded = !prev.is_some_and(char::is_alphanumeric);
        prev = Some(c);
        if !bounded {
            continue;
        }
        let Some(end) = match_at(&text[start..], needle).map(|len| start + len) else {
            continue;
        };
        if !text[end..].chars().next().is_some_and(char::is_alphanumeric) {
            return Some(end);
        }
    }
    None
}

/// Length in bytes of `needle` matched at the head of `text`, ignoring ASCII case.
fn match_at(text: &str, needle: &str) -> Option<usize> {
    let mut chars = text.char_indices();
    for expected in needle.chars() {
        let (_, c) = chars.next()?;
        if c.to_ascii_lowercase() != expected {
            return None;
        }
    }
    Some(chars.next().map_or(text.len(), |(i, _)| i))
}

/// Drop leading whole-word articles, repeatedly.
fn strip_articles(mut text: &str) -> &str {
    loop {
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r),
            None => (text, ""),
        };
        if !ARTICLES.iter().any(|a| a.eq_ignore_ascii_case(word)) {
            return text;
        }
        text = rest.trim_start();
        if text.is_empty() {
            return text;
        }
    }
}
