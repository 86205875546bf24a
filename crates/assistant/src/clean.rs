//! Output cleaning: strip role-name prefixes the model leaks into replies.

use matilda_core::DisplayNames;

/// Remove a leading `"{assistant}:"` and every `"{user}:"`, then trim.
pub fn clean_response(text: &str, names: &DisplayNames) -> String {
    let assistant_prefix = format!("{}:", names.assistant);
    let user_tag = format!("{}:", names.user);

    let text = text.trim();
    let text = text.strip_prefix(&assistant_prefix).unwrap_or(text);
    text.replace(&user_tag, "").trim().to_string()
}
