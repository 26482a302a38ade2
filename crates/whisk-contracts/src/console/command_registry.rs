#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: CommandAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandAction {
    Help,
    Start,
    Pause,
    Resume,
    Stop,
    Status,
    Rescan,
    Quit,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: CommandAction::Help,
    },
    CommandSpec {
        command: "start",
        action: CommandAction::Start,
    },
    CommandSpec {
        command: "pause",
        action: CommandAction::Pause,
    },
    CommandSpec {
        command: "resume",
        action: CommandAction::Resume,
    },
    CommandSpec {
        command: "stop",
        action: CommandAction::Stop,
    },
    CommandSpec {
        command: "status",
        action: CommandAction::Status,
    },
    CommandSpec {
        command: "rescan",
        action: CommandAction::Rescan,
    },
    CommandSpec {
        command: "quit",
        action: CommandAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: CommandAction::Quit,
    },
];

pub(crate) const RETRY_COMMAND: &str = "retry";
pub(crate) const IMPORT_COMMAND: &str = "import";
pub(crate) const COUNT_COMMAND: &str = "count";
pub(crate) const RATIO_COMMAND: &str = "ratio";

pub const CONSOLE_HELP_COMMANDS: &[&str] = &[
    "/start",
    "/pause",
    "/resume",
    "/stop",
    "/retry <row>",
    "/status",
    "/rescan",
    "/import <path>",
    "/count <1-20>",
    "/ratio <landscape|portrait|square>",
    "/help",
    "/quit",
];
