use std::collections::HashMap;

use relay_core::agent::{first_name, role_part};
use relay_core::messages::{ParseResult, ParsedMessage, TARGET_ALL, TARGET_USER};

const FENCE: &str = "```";

/// Mention targets valid in one session.
///
/// A mention may use the full `firstname.role`, or a first name or role
/// part when exactly one agent carries it. `all` and `user` always resolve.
#[derive(Clone, Debug, Default)]
pub struct KnownTargets {
    aliases: HashMap<String, Option<String>>,
}

impl KnownTargets {
    pub fn new<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = agents.into_iter().map(|n| n.as_ref().to_string()).collect();
        let mut aliases: HashMap<String, Option<String>> = HashMap::new();
        for name in &names {
            for alias in [first_name(name), role_part(name)] {
                if alias == name {
                    continue;
                }
                aliases
                    .entry(alias.to_string())
                    .and_modify(|target| {
                        if target.as_deref() != Some(name) {
                            *target = None;
                        }
                    })
                    .or_insert_with(|| Some(name.clone()));
            }
        }
        // Full names and the reserved targets win over any alias.
        for name in names.iter().map(String::as_str).chain([TARGET_ALL, TARGET_USER]) {
            aliases.insert(name.to_string(), Some(name.to_string()));
        }
        Self { aliases }
    }

    /// Canonical target for a mention, if it resolves unambiguously.
    pub fn resolve(&self, mention: &str) -> Option<&str> {
        self.aliases.get(mention).and_then(|t| t.as_deref())
    }
}

/// `@name:` at column zero. Returns the raw name and the text after the colon.
fn split_mention(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('@')?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let (name, tail) = rest.split_at(end);
    let content = tail.strip_prefix(':')?;
    Some((name, content))
}

/// Split one agent response into routed messages and private notes.
///
/// Fenced code and blockquotes are never scanned for mentions. A mention
/// opens a message only at the start of a line and only for a known target;
/// the message continues over non-blank lines until a blank line, another
/// mention, a fence or a blockquote.
pub fn parse(text: &str, known: &KnownTargets) -> ParseResult {
    let mut messages = Vec::new();
    let mut note_lines: Vec<&str> = Vec::new();
    let mut in_code = false;
    let mut current: Option<ParsedMessage> = None;

    for line in text.split('\n') {
        let trimmed = line.trim_start();

        if trimmed.starts_with(FENCE) {
            in_code = !in_code;
            messages.extend(current.take());
            note_lines.push(line);
            continue;
        }

        if in_code || trimmed.starts_with('>') {
            messages.extend(current.take());
            note_lines.push(line);
            continue;
        }

        if let Some((target, content)) =
            split_mention(line).and_then(|(name, content)| Some((known.resolve(name)?, content)))
        {
            messages.extend(current.take());
            current = Some(ParsedMessage {
                to: target.to_string(),
                content: content.trim().to_string(),
            });
            continue;
        }

        match current.as_mut() {
            Some(open) if !line.trim().is_empty() => {
                open.content.push('\n');
                open.content.push_str(line);
            }
            Some(_) => {
                messages.extend(current.take());
                note_lines.push(line);
            }
            None => note_lines.push(line),
        }
    }
    messages.extend(current);

    ParseResult {
        messages,
        notes: note_lines.join("\n").trim().to_string(),
    }
}

/// Role instructions handed to an agent once, at spawn.
pub fn build_system_prompt(
    name: &str,
    agents: &[String],
    description: Option<&str>,
    max_turns: Option<u32>,
) -> String {
    let others: Vec<&str> = agents
        .iter()
        .map(String::as_str)
        .filter(|a| *a != name)
        .collect();
    let example_peer = others.first().copied().unwrap_or("other");
    let role_line = match description {
        Some(desc) if !desc.trim().is_empty() => format!("Your role: {desc}"),
        _ => format!("Stay focused on your role: {}", role_part(name)),
    };

    let mut lines = vec![
        format!("You are \"{name}\" in a multi-agent session."),
        format!(
            "Other agents: {}",
            if others.is_empty() { "none".to_string() } else { others.join(", ") }
        ),
    ];
    if let Some(turns) = max_turns.filter(|t| *t > 0) {
        lines.push(String::new());
        lines.push(format!(
            "This session has a HARD LIMIT of {turns} turns. After turn {turns}, the session ends \
             and any undelivered work is lost. Deliver your final output to @user before then."
        ));
    }
    lines.extend(
        [
            "",
            "Agent names use the format firstname.role (e.g. maren.storyteller).",
            "Use the FULL name (including the dot) in @mentions.",
            "",
            "HOW COMMUNICATION WORKS:",
            "- Plain text (no @mention) = your working notes. Visible in the transcript",
            "  but nobody is asked to respond to it.",
            "- @name: message = sends a message to that agent and TRIGGERS THEM TO RESPOND.",
            "- @user: message = final output delivered to the human. Not routed to any agent.",
            "  Use it only for the final deliverable of the whole session.",
            "- @all: message = broadcast to every other agent (all of them respond).",
            "",
            "Do NOT @mention an agent unless you need them to act. Unneeded mentions",
            "create endless loops. If you are done, write plain text instead.",
            "",
            "Start a NEW LINE with @name: to address someone. The message continues on",
            "following lines until the next @mention or a blank line.",
            "",
            "Examples:",
            "I have looked at the problem and the key issue is X.",
            "",
        ]
        .map(String::from),
    );
    lines.push(format!("@{example_peer}: Please verify X against the code you own."));
    lines.push("Here are the details you will need.".into());
    lines.push(String::new());
    lines.push("@all: Heads up, X affects every module.".into());
    lines.push(String::new());
    lines.push("@user: Final report ready.".into());
    lines.push(String::new());
    lines.push("Rules:".into());
    lines.push("- @mention = request for action. Plain text = notes.".into());
    lines.push("- Each line starting with @name: begins a new message.".into());
    lines.push("- Text inside code fences or > quotes is never routed.".into());
    lines.push(format!("- {role_line}"));
    lines.push(
        "- When asked to go first, produce your output directly instead of asking others to start."
            .into(),
    );
    lines.join("\n")
}
