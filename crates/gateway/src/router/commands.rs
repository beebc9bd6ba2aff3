//! Built-in bot commands.

use std::time::Instant;

use async_trait::async_trait;

use wg_domain::Identity;

use super::{Command, CommandContext, CommandSpec};

// ── .menu ─────────────────────────────────────────────────────────────

/// Static command list, rendered once from the registered specs.
pub struct Menu {
    text: String,
}

impl Menu {
    pub fn render(bot_name: &str, prefix: &str, specs: &[CommandSpec]) -> Self {
        let mut text = format!("🤖 *{bot_name}*\n\nCommands:\n");
        text.push_str(&format!("• {prefix}menu - Show commands\n"));
        for spec in specs {
            let usage = match &spec.argument {
                Some(arg) => format!("{prefix}{} {arg}", spec.name),
                None => format!("{prefix}{}", spec.name),
            };
            text.push_str(&format!("• {usage} - {}\n", spec.description));
        }
        Self {
            text: text.trim_end().to_string(),
        }
    }
}

#[async_trait]
impl Command for Menu {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("menu", "Show commands")
    }

    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        ctx.reply(&self.text).await
    }
}

// ── .ping / .alive ────────────────────────────────────────────────────

pub struct Ping;

#[async_trait]
impl Command for Ping {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("ping", "Check status").alias("alive")
    }

    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        ctx.reply("🏓 Pong! Bot is alive!").await
    }
}

// ── .owner ────────────────────────────────────────────────────────────

pub struct Owner {
    owner: Option<Identity>,
}

impl Owner {
    pub fn new(owner: Option<Identity>) -> Self {
        Self { owner }
    }
}

#[async_trait]
impl Command for Owner {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("owner", "Contact")
    }

    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        match &self.owner {
            Some(owner) => ctx.reply(&format!("👑 Owner: +{owner}")).await,
            None => ctx.reply("👑 No owner configured.").await,
        }
    }
}

// ── .speed ────────────────────────────────────────────────────────────

/// Reports how long one outbound send takes, plus the delivery delay of the
/// triggering message when the network stamped it.
pub struct Speed;

#[async_trait]
impl Command for Speed {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("speed", "Response time")
    }

    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let started = Instant::now();
        ctx.reply("⚡ Testing speed...").await?;
        let round_trip = started.elapsed().as_millis();

        let mut text = format!("⚡ Speed: {round_trip} ms");
        if ctx.sent_at > 0 {
            let delay = (chrono::Utc::now().timestamp() - ctx.sent_at).max(0);
            text.push_str(&format!("\n📨 Received after {delay} s"));
        }
        ctx.reply(&text).await
    }
}

// ── .delete ───────────────────────────────────────────────────────────

/// Unlinks the session that received the command.  Only the linked number
/// itself or an admin may do this.
pub struct Delete;

#[async_trait]
impl Command for Delete {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("delete", "Unlink this number")
    }

    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        if ctx.sender != ctx.session && !ctx.control.is_admin(&ctx.sender) {
            return ctx
                .reply("⛔ Only the linked number or an admin can delete this session.")
                .await;
        }

        let removed = ctx.control.forget(&ctx.session).await?;
        tracing::info!(identity = %ctx.session, sender = %ctx.sender, removed, "session deleted by command");

        // The connection is gone by now; the confirmation is best-effort.
        if let Err(e) = ctx.reply("🗑️ Session deleted.").await {
            tracing::debug!(identity = %ctx.session, error = %e, "delete confirmation not delivered");
        }
        Ok(())
    }
}

// ── .movie / .drama / .song ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Movie,
    Drama,
    Song,
}

impl SearchKind {
    fn name(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Drama => "drama",
            Self::Song => "song",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Self::Movie => "🎬",
            Self::Drama => "📺",
            Self::Song => "🎵",
        }
    }
}

/// Placeholder search: acknowledges the query, no lookup yet.
pub struct Search {
    kind: SearchKind,
}

impl Search {
    pub fn new(kind: SearchKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Command for Search {
    fn spec(&self) -> CommandSpec {
        let description = match self.kind {
            SearchKind::Movie => "Search movies",
            SearchKind::Drama => "Search dramas",
            SearchKind::Song => "Search songs",
        };
        CommandSpec::new(self.kind.name(), description).argument("[name]")
    }

    async fn run(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let icon = self.kind.icon();
        if ctx.argument.is_empty() {
            return ctx
                .reply(&format!("{icon} Please add a {} name.", self.kind.name()))
                .await;
        }
        ctx.reply(&format!(
            "{icon} Searching: *{}*\n\nDownload links coming soon...",
            ctx.argument
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_lists_arguments() {
        let specs = vec![
            Ping.spec(),
            Search::new(SearchKind::Movie).spec(),
        ];
        let menu = Menu::render("Bot", ".", &specs);
        assert!(menu.text.starts_with("🤖 *Bot*"));
        assert!(menu.text.contains("• .menu - Show commands"));
        assert!(menu.text.contains("• .ping - Check status"));
        assert!(menu.text.contains("• .movie [name] - Search movies"));
    }
}
