//! Built-in administration commands.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `!join <channel>` | join a channel |
//! | `!leave <channel>` | leave a channel |
//! | `!leave all` | leave every channel except the current one |
//! | `!toggle on\|off\|spam\|command\|bld\|helpful\|special\|sub` | change the current channel's toggles |
//! | `!ping` | reply with a functional message |
//! | `!addrole <role> <user>` / `!removerole <role> <user>` | edit the role table |
//!
//! `!toggle` and `!ping` are also available to holders of the
//! [`TOGGLER`] and [`PINGER`] roles.

use std::sync::Arc;

use crate::foundation::MessageKind;
use crate::pipeline::{HandlerContext, HandlerResult, Outcome, Registry};
use crate::state::Toggle;

/// Role allowed to use `!toggle`.
pub const TOGGLER: &str = "toggler";
/// Role allowed to use `!ping`.
pub const PINGER: &str = "pinger";

/// Registers every built-in command.
pub fn register_admin_commands(registry: &mut Registry) {
    registry
        .admin("join", join)
        .admin("leave", leave)
        .admin("toggle", toggle)
        .admin("ping", ping)
        .admin("add_role", add_role)
        .admin("remove_role", remove_role)
        .role(TOGGLER, "toggle", role_toggle)
        .role(PINGER, "ping", role_ping);
}

// The administrator already ran the admin copies of these.
async fn role_toggle(ctx: Arc<HandlerContext>) -> HandlerResult {
    if ctx.engine().is_admin(ctx.user()) {
        return Ok(Outcome::Continue);
    }
    toggle(ctx).await
}

async fn role_ping(ctx: Arc<HandlerContext>) -> HandlerResult {
    if ctx.engine().is_admin(ctx.user()) {
        return Ok(Outcome::Continue);
    }
    ping(ctx).await
}

/// Words following `command`, or `None` if `text` is a different command.
fn arguments<'a>(text: &'a str, command: &str) -> Option<std::str::SplitWhitespace<'a>> {
    let rest = text.strip_prefix(command)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.split_whitespace())
}

fn is_word(arg: &str) -> bool {
    arg.chars().all(|c| c.is_alphanumeric() || c == '_')
}

async fn join(ctx: Arc<HandlerContext>) -> HandlerResult {
    let Some(target) = arguments(ctx.text(), "!join").and_then(|mut a| a.next()) else {
        return Ok(Outcome::Continue);
    };
    if !is_word(target) {
        return Ok(Outcome::Continue);
    }
    ctx.engine().join_channel(target)?;
    Ok(Outcome::Handled)
}

async fn leave(ctx: Arc<HandlerContext>) -> HandlerResult {
    let Some(target) = arguments(ctx.text(), "!leave").and_then(|mut a| a.next()) else {
        return Ok(Outcome::Continue);
    };
    let engine = ctx.engine();

    if target.eq_ignore_ascii_case("all") {
        for channel in engine.channels() {
            if channel != ctx.channel() {
                engine.leave_channel(&channel)?;
            }
        }
    } else if is_word(target) {
        engine.leave_channel(target)?;
    } else {
        return Ok(Outcome::Continue);
    }
    Ok(Outcome::Handled)
}

async fn toggle(ctx: Arc<HandlerContext>) -> HandlerResult {
    let Some(arg) = arguments(ctx.text(), "!toggle").and_then(|mut a| a.next()) else {
        return Ok(Outcome::Continue);
    };
    // Unknown arguments are swallowed like any other toggle.
    let Ok(toggle) = arg.parse::<Toggle>() else {
        return Ok(Outcome::Handled);
    };

    ctx.engine().toggle(ctx.channel(), toggle)?;
    match toggle {
        Toggle::On => ctx.reply("Hey everyone!", MessageKind::Chat)?,
        Toggle::Off => ctx.reply("Bye everyone!", MessageKind::Chat)?,
        Toggle::Flip(_) => {}
    }
    Ok(Outcome::Handled)
}

async fn ping(ctx: Arc<HandlerContext>) -> HandlerResult {
    if ctx.text().trim() != "!ping" {
        return Ok(Outcome::Continue);
    }
    ctx.reply("Pong, I'm alive!", MessageKind::Functional)?;
    Ok(Outcome::Handled)
}

async fn add_role(ctx: Arc<HandlerContext>) -> HandlerResult {
    let Some((role, user)) = role_arguments(ctx.text(), "!addrole") else {
        return Ok(Outcome::Continue);
    };
    if ctx.engine().roles().grant(&user, ctx.channel(), &role) {
        ctx.reply(format!("{user} now has role {role}"), MessageKind::Command)?;
    }
    Ok(Outcome::Handled)
}

async fn remove_role(ctx: Arc<HandlerContext>) -> HandlerResult {
    let Some((role, user)) = role_arguments(ctx.text(), "!removerole") else {
        return Ok(Outcome::Continue);
    };
    if ctx.engine().roles().revoke(&user, ctx.channel(), &role) {
        ctx.reply(format!("{user} no longer has role {role}"), MessageKind::Command)?;
    }
    Ok(Outcome::Handled)
}

fn role_arguments(text: &str, command: &str) -> Option<(String, String)> {
    let mut args = arguments(text, command)?;
    let role = args.next().filter(|a| is_word(a))?;
    let user = args.next().filter(|a| is_word(a))?;
    Some((role.to_lowercase(), user.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_require_exact_command() {
        assert_eq!(
            arguments("!join lobby", "!join").and_then(|mut a| a.next()),
            Some("lobby")
        );
        assert!(arguments("!joiner lobby", "!join").is_none());
        assert_eq!(arguments("!join", "!join").and_then(|mut a| a.next()), None);
    }

    #[test]
    fn role_arguments_parse() {
        assert_eq!(
            role_arguments("!addrole Toggler Alice", "!addrole"),
            Some(("toggler".to_string(), "alice".to_string()))
        );
        assert_eq!(role_arguments("!addrole toggler", "!addrole"), None);
    }
}
