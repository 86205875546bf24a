//! `matilda chat`: Interactive or single-message chat mode.

use matilda_assistant::{Assistant, AssistantSettings, Reply};
use matilda_config::AppConfig;
use matilda_core::StyleProfile;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// A `!`-prefixed command typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum ChatCommand {
    Help,
    Clear,
    /// `None` lists the available styles
    Style(Option<String>),
    Stream(Option<bool>),
    Exit,
    Unknown(String),
}

/// Classify a prompt line. `None` means it is a message for the assistant.
fn parse_command(line: &str) -> Option<ChatCommand> {
    let line = line.trim();
    if matches!(line.to_ascii_lowercase().as_str(), "exit" | "quit" | "bye") {
        return Some(ChatCommand::Exit);
    }
    let rest = line.strip_prefix('!')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };
    let arg = (!arg.is_empty()).then(|| arg.to_string());

    Some(match name.to_ascii_lowercase().as_str() {
        "help" => ChatCommand::Help,
        "clear" => ChatCommand::Clear,
        "style" => ChatCommand::Style(arg),
        "stream" => ChatCommand::Stream(match arg.as_deref() {
            Some("on") => Some(true),
            Some("off") => Some(false),
            _ => None,
        }),
        "exit" | "quit" => ChatCommand::Exit,
        other => ChatCommand::Unknown(other.to_string()),
    })
}

fn print_help() {
    println!("  Commands:");
    println!("    !help            Show this help");
    println!("    !clear           Forget the conversation");
    println!("    !style NAME      Change style ({})", style_names().join(", "));
    println!("    !stream on|off   Toggle streamed replies");
    println!("    !exit            Leave (also: exit, quit, bye)");
    println!("  Ctrl+C cancels a reply in progress, or exits when idle.");
}

fn style_names() -> Vec<&'static str> {
    StyleProfile::profiles().iter().map(|p| p.name).collect()
}

/// A failed single message makes the command fail.
fn single_message_outcome(reply: Reply) -> matilda_core::Result<()> {
    match reply.failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub async fn run(no_stream: bool, message: Option<String>) -> matilda_core::Result<()> {
    let config = AppConfig::load()?;

    let adapter = Arc::new(matilda_providers::build_from_config(&config));
    let observer = matilda_journal::from_settings(
        config.logging.log_conversations,
        config.logging.log_dir.clone(),
    );
    let assistant = Assistant::with_observer(AssistantSettings::from_config(&config), adapter, observer);
    if no_stream {
        assistant.set_streaming(false);
    }
    let name = assistant.names().assistant.clone();

    if let Some(msg) = message {
        // Single message mode
        let reply = assistant.respond(&msg).await;
        println!("{}", reply.text);
        return single_message_outcome(reply);
    }

    // Interactive mode
    println!();
    println!("  Matilda: Interactive Mode");
    println!("  Model:   {}", config.generation.model);
    println!("  Style:   {}", assistant.style());
    println!("  Type !help for commands.");
    println!();
    println!("  {name} > {}", assistant.startup_greeting());
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = parse_command(&line) {
            match command {
                ChatCommand::Help => print_help(),
                ChatCommand::Clear => {
                    assistant.clear();
                    println!("  Conversation cleared.");
                }
                ChatCommand::Style(Some(style)) => println!("  {}", assistant.set_style(&style)),
                ChatCommand::Style(None) => {
                    println!("  Current style: {}", assistant.style());
                    println!("  Available: {}", style_names().join(", "));
                }
                ChatCommand::Stream(Some(enabled)) => {
                    assistant.set_streaming(enabled);
                    println!("  Streaming {}.", if enabled { "enabled" } else { "disabled" });
                }
                ChatCommand::Stream(None) => println!("  Usage: !stream on|off"),
                ChatCommand::Exit => break,
                ChatCommand::Unknown(name) => {
                    println!("  Unknown command: !{name}. Type !help for commands.")
                }
            }
            println!();
            continue;
        }

        print!("\n  {name} > ");
        std::io::stdout().flush()?;

        let turn = assistant.process_stream(&line, |fragment| {
            print!("{fragment}");
            let _ = std::io::stdout().flush();
        });
        tokio::pin!(turn);
        let reply = loop {
            tokio::select! {
                reply = &mut turn => break reply,
                _ = tokio::signal::ctrl_c() => {
                    assistant.cancel();
                }
            }
        };

        if let Some(image) = &reply.image {
            tracing::debug!(path = %image, "Image stored");
        }
        println!();
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse_command("hello there"), None);
        assert_eq!(parse_command("tell me about exits"), None);
    }

    #[test]
    fn exit_words() {
        for word in ["exit", "quit", "bye", "BYE", "!exit", "!quit"] {
            assert_eq!(parse_command(word), Some(ChatCommand::Exit), "{word}");
        }
    }

    #[test]
    fn style_with_and_without_name() {
        assert_eq!(
            parse_command("!style casual"),
            Some(ChatCommand::Style(Some("casual".into())))
        );
        assert_eq!(parse_command("!style"), Some(ChatCommand::Style(None)));
    }

    #[test]
    fn stream_toggle() {
        assert_eq!(parse_command("!stream on"), Some(ChatCommand::Stream(Some(true))));
        assert_eq!(parse_command("!stream off"), Some(ChatCommand::Stream(Some(false))));
        assert_eq!(parse_command("!stream maybe"), Some(ChatCommand::Stream(None)));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_command("!dance"),
            Some(ChatCommand::Unknown("dance".into()))
        );
        assert_eq!(parse_command("!help"), Some(ChatCommand::Help));
        assert_eq!(parse_command("!clear"), Some(ChatCommand::Clear));
    }

    #[test]
    fn failed_single_message_is_an_error() {
        let reply = Reply {
            text: "I'm not fully initialized yet.".into(),
            image: None,
            failure: Some(matilda_core::GenerationError::Unavailable("no key".into())),
            cancelled: false,
        };
        let err = single_message_outcome(reply).unwrap_err();
        assert!(matches!(err, matilda_core::Error::Generation(_)));

        let ok = Reply {
            text: "Hi".into(),
            image: None,
            failure: None,
            cancelled: false,
        };
        assert!(single_message_outcome(ok).is_ok());
    }
}
