#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Clear,
    History,
    /// `/model` alone reports the active model; with an argument it switches.
    Model(Option<String>),
    Quit,
    Unknown(String),
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/clear" => SlashCommand::Clear,
        "/history" => SlashCommand::History,
        "/model" => SlashCommand::Model(words.next().map(str::to_string)),
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

pub const HELP_TEXT: &str = "\
/help            show this help
/clear           forget the conversation
/history         list the curated history
/model [id]      show or switch the chat model
/quit            exit
Ctrl-C cancels the turn in flight.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello /model"), None);
    }

    #[test]
    fn model_command_takes_optional_argument() {
        assert_eq!(
            parse_slash_command("  /model gemini-2.5-flash "),
            Some(SlashCommand::Model(Some("gemini-2.5-flash".to_string())))
        );
        assert_eq!(
            parse_slash_command("/model"),
            Some(SlashCommand::Model(None))
        );
    }

    #[test]
    fn unknown_commands_keep_their_name() {
        assert_eq!(
            parse_slash_command("/frobnicate now"),
            Some(SlashCommand::Unknown("/frobnicate".to_string()))
        );
        assert_eq!(parse_slash_command("/exit"), Some(SlashCommand::Quit));
    }
}
