use super::command_registry::{
    CommandAction, CommandSpec, COUNT_COMMAND, IMPORT_COMMAND, NO_ARG_COMMANDS, RATIO_COMMAND,
    RETRY_COMMAND,
};
use crate::settings::{AspectRatio, MAX_IMAGE_COUNT, MIN_IMAGE_COUNT};

/// One line typed by the operator. Lines that are not slash commands add a
/// prompt row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Noop,
    Help,
    Start,
    Pause,
    Resume,
    Stop,
    Status,
    Rescan,
    Quit,
    /// Zero-based row; operators type the one-based row number.
    Retry { row: usize },
    Import { path: String },
    Count { count: usize },
    Ratio { ratio: AspectRatio },
    AddPrompt { prompt: String },
    Invalid { command: String, message: String },
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<CommandAction> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn no_arg_command(action: CommandAction) -> OperatorCommand {
    match action {
        CommandAction::Help => OperatorCommand::Help,
        CommandAction::Start => OperatorCommand::Start,
        CommandAction::Pause => OperatorCommand::Pause,
        CommandAction::Resume => OperatorCommand::Resume,
        CommandAction::Stop => OperatorCommand::Stop,
        CommandAction::Status => OperatorCommand::Status,
        CommandAction::Rescan => OperatorCommand::Rescan,
        CommandAction::Quit => OperatorCommand::Quit,
    }
}

fn parse_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

fn invalid(command: &str, message: impl Into<String>) -> OperatorCommand {
    OperatorCommand::Invalid {
        command: command.to_string(),
        message: message.into(),
    }
}

fn parse_retry(arg: &str) -> OperatorCommand {
    match arg.trim().parse::<usize>() {
        Ok(row) if row >= 1 => OperatorCommand::Retry { row: row - 1 },
        _ => invalid(RETRY_COMMAND, "/retry expects a row number starting at 1"),
    }
}

fn parse_count(arg: &str) -> OperatorCommand {
    match arg.trim().parse::<usize>() {
        Ok(count) if (MIN_IMAGE_COUNT..=MAX_IMAGE_COUNT).contains(&count) => {
            OperatorCommand::Count { count }
        }
        _ => invalid(
            COUNT_COMMAND,
            format!("/count expects a number between {MIN_IMAGE_COUNT} and {MAX_IMAGE_COUNT}"),
        ),
    }
}

pub fn parse_command(text: &str) -> OperatorCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return OperatorCommand::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return no_arg_command(action);
            }

            return match command.as_str() {
                RETRY_COMMAND => parse_retry(arg),
                COUNT_COMMAND => parse_count(arg),
                RATIO_COMMAND => match arg.parse::<AspectRatio>() {
                    Ok(ratio) => OperatorCommand::Ratio { ratio },
                    Err(message) => invalid(RATIO_COMMAND, message),
                },
                IMPORT_COMMAND => {
                    let path = parse_path_arg(arg);
                    if path.is_empty() {
                        invalid(IMPORT_COMMAND, "/import requires a path")
                    } else {
                        OperatorCommand::Import { path }
                    }
                }
                _ => invalid(&command, format!("Unknown command /{command}")),
            };
        }
    }

    OperatorCommand::AddPrompt {
        prompt: raw_trimmed.to_string(),
    }
}
