//! Slash-command parsing plus the help text shown by `/help`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Lower-cased command name including the leading `/`.
    pub name: String,
    pub args: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionSpec {
    pub syntax: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

pub const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        name: "/sub",
        usage: "/sub [name]",
        description: "List subscriptions or switch to one",
    },
    CommandSpec {
        name: "/rg",
        usage: "/rg [name|clear]",
        description: "Show, set, or clear the active resource group",
    },
    CommandSpec {
        name: "/env",
        usage: "/env",
        description: "Show environment info, user, and available tools",
    },
    CommandSpec {
        name: "/help",
        usage: "/help",
        description: "Show this help message",
    },
    CommandSpec {
        name: "/clear",
        usage: "/clear",
        description: "Clear the screen",
    },
    CommandSpec {
        name: "/exit",
        usage: "/exit",
        description: "Exit the shell (alias: /quit)",
    },
];

pub const COMMAND_NAMES: &[&str] = &["/sub", "/rg", "/env", "/help", "/clear", "/exit", "/quit"];

pub const MENTION_SPECS: &[MentionSpec] = &[
    MentionSpec {
        syntax: "@sub",
        description: "Include current subscription context",
        example: "@sub list my resources",
    },
    MentionSpec {
        syntax: "@rg:<name>",
        description: "Include resource group context",
        example: "@rg:mygroup show all VMs",
    },
    MentionSpec {
        syntax: "@vm:<name>",
        description: "Include VM context",
        example: "@vm:web-server check status",
    },
    MentionSpec {
        syntax: "@aks:<name>",
        description: "Include AKS cluster context",
        example: "@aks:prod get node count",
    },
    MentionSpec {
        syntax: "@file:<path>",
        description: "Include file contents as context",
        example: "@file:main.bicep deploy this",
    },
    MentionSpec {
        syntax: "@<type>:<name>",
        description: "Include a typed resource (storage, kv, acr, ...)",
        example: "@storage:logs rotate the keys",
    },
    MentionSpec {
        syntax: "@<name>",
        description: "Include a resource cached from the active /rg scope",
        example: "@web-01 why is it slow",
    },
];

/// Splits `/name args` into a lower-cased name and the trimmed remainder.
pub fn parse_command(input: &str) -> Option<ParsedCommand<'_>> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let (name, args) = match trimmed.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (trimmed, ""),
    };
    Some(ParsedCommand {
        name: name.to_ascii_lowercase(),
        args,
    })
}

pub fn canonical_command_name(name: &str) -> &str {
    if name == "/quit" {
        "/exit"
    } else {
        name
    }
}

pub fn render_help_overview() -> String {
    let mut lines = vec!["Slash commands:".to_string()];
    for spec in COMMAND_SPECS {
        lines.push(format!("  {:<18} {}", spec.usage, spec.description));
    }
    lines.push(String::new());
    lines.push("@ mentions:".to_string());
    for spec in MENTION_SPECS {
        lines.push(format!(
            "  {:<18} {:<52} e.g. {}",
            spec.syntax, spec.description, spec.example
        ));
    }
    lines.join("\n")
}

pub fn unknown_command_message(command: &str) -> String {
    match suggest_command(command) {
        Some(suggestion) => format!(
            "Unknown command: {command}. Did you mean {suggestion}? Type /help for available commands."
        ),
        None => format!("Unknown command: {command}. Type /help for available commands."),
    }
}

fn suggest_command(command: &str) -> Option<&'static str> {
    if command.len() < 2 {
        return None;
    }
    if let Some(prefix) = COMMAND_NAMES
        .iter()
        .copied()
        .find(|candidate| candidate.starts_with(command))
    {
        return Some(prefix);
    }
    let (candidate, distance) = COMMAND_NAMES
        .iter()
        .copied()
        .map(|candidate| (candidate, edit_distance(command, candidate)))
        .min_by_key(|(_, distance)| *distance)?;
    (distance <= 1).then_some(candidate)
}

fn edit_distance(left: &str, right: &str) -> usize {
    let right = right.chars().collect::<Vec<_>>();
    let mut previous = (0..=right.len()).collect::<Vec<_>>();
    for (i, a) in left.chars().enumerate() {
        let mut current = vec![i + 1; right.len() + 1];
        for (j, b) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(a != *b);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[right.len()]
}
