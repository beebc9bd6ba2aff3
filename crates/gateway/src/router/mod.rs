//! Event router: turns inbound chat messages into bot commands.
//!
//! A message is a command when its text starts with the configured prefix
//! followed by a registered name (case-insensitive).  Commands without an
//! argument must match exactly; commands taking a free-form argument match
//! the name followed by whitespace and receive the trimmed remainder.
//! Anything else is ignored.

pub mod commands;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use wg_domain::config::BotConfig;
use wg_domain::trace::TraceEvent;
use wg_domain::Identity;
use wg_protocol::InboundMessage;

use crate::supervisor::{Connection, SupervisorError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Metadata describing a command.
#[derive(Clone, Debug, Serialize)]
pub struct CommandSpec {
    /// Lowercase name without the prefix.
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Placeholder for the free-form argument (`"[name]"`).  `None` means
    /// the command takes no argument and must match exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    pub description: String,
}

impl CommandSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            argument: None,
            description: description.into(),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn argument(mut self, placeholder: &str) -> Self {
        self.argument = Some(placeholder.into());
        self
    }

    pub fn takes_argument(&self) -> bool {
        self.argument.is_some()
    }
}

/// Session operations a command may trigger.
#[async_trait]
pub trait SessionControl: Send + Sync {
    fn is_admin(&self, identity: &Identity) -> bool;

    /// Log out, drop the live connection and delete persisted state.
    async fn forget(&self, identity: &Identity) -> Result<bool, SupervisorError>;
}

/// Everything a command needs to act on one message.
pub struct CommandContext {
    pub connection: Connection,
    /// The identity whose session received the message.
    pub session: Identity,
    pub sender: Identity,
    /// Where replies go (the originating chat).
    pub chat: String,
    pub argument: String,
    /// Message timestamp as reported by the network (unix seconds, 0 if
    /// unknown).
    pub sent_at: i64,
    pub control: Arc<dyn SessionControl>,
}

impl CommandContext {
    pub async fn reply(&self, text: &str) -> anyhow::Result<()> {
        self.connection.send_text(&self.chat, text).await?;
        Ok(())
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn spec(&self) -> CommandSpec;
    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CommandRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Prefix-dispatched command table shared by every session.
pub struct CommandRouter {
    prefix: String,
    commands: Vec<Arc<dyn Command>>,
    /// Lowercase name or alias → index into `commands`.
    index: HashMap<String, usize>,
}

impl CommandRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            commands: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a command. Returns self for chaining.  Later registrations
    /// win on name clashes.
    pub fn register(mut self, command: Arc<dyn Command>) -> Self {
        let spec = command.spec();
        let slot = self.commands.len();
        self.commands.push(command);
        for name in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
            self.index.insert(name.to_ascii_lowercase(), slot);
        }
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Specs in registration order.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.commands.iter().map(|c| c.spec()).collect()
    }

    /// Match `text` against the table.  Returns the command and its
    /// (trimmed, possibly empty) argument.
    pub fn resolve<'t>(&self, text: &'t str) -> Option<(&Arc<dyn Command>, &'t str)> {
        if self.prefix.is_empty() {
            return None;
        }
        let rest = text.trim_end().strip_prefix(self.prefix.as_str())?;
        let (head, argument) = match rest.find(char::is_whitespace) {
            Some(at) => (&rest[..at], rest[at..].trim()),
            None => (rest, ""),
        };
        let command = self
            .index
            .get(&head.to_ascii_lowercase())
            .map(|&slot| &self.commands[slot])?;
        if !argument.is_empty() && !command.spec().takes_argument() {
            return None;
        }
        Some((command, argument))
    }

    /// Route one inbound message.  Returns the name of the command that ran,
    /// if any.  Command failures are logged, never propagated.
    pub async fn dispatch(
        &self,
        connection: Connection,
        control: Arc<dyn SessionControl>,
        message: InboundMessage,
    ) -> Option<String> {
        let text = extract_text(&message)?;
        let (command, argument) = self.resolve(text)?;
        let session = connection.identity().clone();

        let Some(sender) = sender_of(&message, &session) else {
            tracing::debug!(chat = %message.key.remote_jid, "command from unknown sender ignored");
            return None;
        };

        let name = command.spec().name;
        TraceEvent::CommandDispatched {
            identity: session.to_string(),
            command: name.clone(),
            sender: sender.to_string(),
        }
        .emit();

        let ctx = CommandContext {
            connection,
            session,
            sender,
            chat: message.key.remote_jid.clone(),
            argument: argument.to_string(),
            sent_at: message.timestamp,
            control,
        };
        if let Err(e) = command.run(&ctx).await {
            tracing::warn!(
                identity = %ctx.session,
                command = %name,
                error = %e,
                "command failed"
            );
        }
        Some(name)
    }
}

/// Build the router with every built-in command.
pub fn build_default_router(bot: &BotConfig, owner: Option<Identity>) -> CommandRouter {
    let router = CommandRouter::new(bot.prefix.clone())
        .register(Arc::new(commands::Ping))
        .register(Arc::new(commands::Owner::new(owner)))
        .register(Arc::new(commands::Speed))
        .register(Arc::new(commands::Search::new(commands::SearchKind::Movie)))
        .register(Arc::new(commands::Search::new(commands::SearchKind::Drama)))
        .register(Arc::new(commands::Search::new(commands::SearchKind::Song)))
        .register(Arc::new(commands::Delete));

    let menu = commands::Menu::render(&bot.name, &bot.prefix, &router.specs());
    router.register(Arc::new(menu))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plain text of a message, from either the simple or the extended form.
pub fn extract_text(message: &InboundMessage) -> Option<&str> {
    let content = message.content.as_ref()?;
    content
        .conversation
        .as_deref()
        .or_else(|| content.extended_text.as_ref()?.text.as_deref())
        .filter(|t| !t.trim().is_empty())
}

/// Who sent the message: the session itself for its own messages, the
/// participant in groups, otherwise the chat peer.
fn sender_of(message: &InboundMessage, session: &Identity) -> Option<Identity> {
    if message.key.from_me {
        return Some(session.clone());
    }
    if message.key.is_group() {
        return message.key.participant.as_deref().and_then(Identity::from_jid);
    }
    Identity::from_jid(&message.key.remote_jid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wg_protocol::{ExtendedText, MessageContent, MessageKey};

    struct Noop(CommandSpec);

    #[async_trait]
    impl Command for Noop {
        fn spec(&self) -> CommandSpec {
            self.0.clone()
        }
        async fn run(&self, _ctx: &CommandContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn router() -> CommandRouter {
        CommandRouter::new(".")
            .register(Arc::new(Noop(CommandSpec::new("ping", "").alias("alive"))))
            .register(Arc::new(Noop(CommandSpec::new("movie", "").argument("[name]"))))
    }

    fn resolved(router: &CommandRouter, text: &str) -> Option<(String, String)> {
        router
            .resolve(text)
            .map(|(c, arg)| (c.spec().name, arg.to_string()))
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let r = router();
        assert_eq!(resolved(&r, ".ping"), Some(("ping".into(), String::new())));
        assert_eq!(resolved(&r, ".PING"), Some(("ping".into(), String::new())));
        assert_eq!(resolved(&r, ".Alive"), Some(("ping".into(), String::new())));
        assert_eq!(resolved(&r, ".ping now"), None);
        assert_eq!(resolved(&r, ".pingx"), None);
        assert_eq!(resolved(&r, "ping"), None);
    }

    #[test]
    fn argument_commands_take_trimmed_remainder() {
        let r = router();
        assert_eq!(
            resolved(&r, ".movie   The Matrix  "),
            Some(("movie".into(), "The Matrix".into()))
        );
        assert_eq!(
            resolved(&r, ".MOVIE dune"),
            Some(("movie".into(), "dune".into()))
        );
        assert_eq!(resolved(&r, ".movie"), Some(("movie".into(), String::new())));
        assert_eq!(resolved(&r, ".movies dune"), None);
    }

    #[test]
    fn unknown_or_unprefixed_text_is_ignored() {
        let r = router();
        assert!(r.resolve(".nope").is_none());
        assert!(r.resolve("hello .ping").is_none());
        assert!(r.resolve(".").is_none());
    }

    fn message(jid: &str, participant: Option<&str>, content: MessageContent) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: jid.into(),
                from_me: false,
                participant: participant.map(str::to_string),
                id: "m1".into(),
            },
            content: Some(content),
            push_name: None,
            timestamp: 0,
        }
    }

    #[test]
    fn text_comes_from_either_form() {
        let plain = message(
            "94700000000@s.whatsapp.net",
            None,
            MessageContent {
                conversation: Some(".ping".into()),
                extended_text: None,
            },
        );
        assert_eq!(extract_text(&plain), Some(".ping"));

        let extended = message(
            "94700000000@s.whatsapp.net",
            None,
            MessageContent {
                conversation: None,
                extended_text: Some(ExtendedText {
                    text: Some(".menu".into()),
                }),
            },
        );
        assert_eq!(extract_text(&extended), Some(".menu"));

        let empty = message("94700000000@s.whatsapp.net", None, MessageContent::default());
        assert_eq!(extract_text(&empty), None);
    }

    #[test]
    fn sender_is_participant_in_groups() {
        let session = Identity::parse("94712345678", 10).unwrap();
        let group = message(
            "120363@g.us",
            Some("94770000000:3@s.whatsapp.net"),
            MessageContent::default(),
        );
        assert_eq!(sender_of(&group, &session).unwrap().as_str(), "94770000000");

        let direct = message("94780000000@s.whatsapp.net", None, MessageContent::default());
        assert_eq!(sender_of(&direct, &session).unwrap().as_str(), "94780000000");

        let mut own = direct.clone();
        own.key.from_me = true;
        assert_eq!(sender_of(&own, &session), Some(session));
    }

    #[test]
    fn default_router_knows_every_builtin() {
        let r = build_default_router(&BotConfig::default(), None);
        for text in [".menu", ".ping", ".alive", ".owner", ".speed", ".delete", ".movie x", ".drama x", ".song x"] {
            assert!(r.resolve(text).is_some(), "{text} should resolve");
        }
    }
}
