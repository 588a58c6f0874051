#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "origin",
    action: "set_origin",
}];

pub(crate) const DEBUG_TAB_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "plan",
        action: "plan",
    },
    CommandSpec {
        command: "raw",
        action: "raw",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "image",
    action: "attach_image",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "search",
        action: "submit",
    },
    CommandSpec {
        command: "clear_image",
        action: "clear_image",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "debug",
        action: "toggle_debug",
    },
    CommandSpec {
        command: "esc",
        action: "escape",
    },
    CommandSpec {
        command: "images",
        action: "load_images",
    },
    CommandSpec {
        command: "summary",
        action: "summary",
    },
    CommandSpec {
        command: "health",
        action: "health",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/search",
    "/image",
    "/clear_image",
    "/reset",
    "/debug",
    "/plan",
    "/raw",
    "/esc",
    "/images",
    "/summary",
    "/origin",
    "/health",
    "/help",
    "/quit",
];
