// src/bot/commands.rs

//! The `bot <verb>` command grammar.
//!
//! Messages addressed to the bot start with `bot`, case-insensitively and
//! with optional whitespace before the verb. The DM and MUC dispatchers
//! share this parser and diverge on the verb table: credential-revealing
//! verbs are DM-only.

/// A parsed bot command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Status,
    /// `create meet [name]`
    CreateMeet { name: Option<String> },
    /// `login user admin` - rotate and reveal the admin account password
    LoginUserAdmin,
    /// `login ej admin` - reveal the stored ejabberd credentials
    LoginEjAdmin,
    /// Bare `bot` or an unknown verb
    Help,
}

/// Parse a message body. `None` means the message is not addressed to the
/// bot at all.
pub fn parse(body: &str) -> Option<BotCommand> {
    let trimmed = body.trim();
    let lower = trimmed.to_lowercase();

    let rest = lower.strip_prefix("bot")?;
    // "bots are cool" is not addressed to us
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let verb = rest.trim();

    if verb.is_empty() {
        return Some(BotCommand::Help);
    }
    if verb == "status" {
        return Some(BotCommand::Status);
    }
    if verb == "login user admin" {
        return Some(BotCommand::LoginUserAdmin);
    }
    if verb == "login ej admin" {
        return Some(BotCommand::LoginEjAdmin);
    }
    if let Some(name) = verb.strip_prefix("create meet") {
        if !name.is_empty() && !name.starts_with(char::is_whitespace) {
            // "create meeting" is not the verb
            return Some(BotCommand::Help);
        }
        let name = name.trim();
        // Preserve the operator's casing for the meeting name; falls back
        // to the lowercased form when case folding shifted byte offsets
        let original = trimmed
            .len()
            .checked_sub(name.len())
            .and_then(|start| trimmed.get(start..))
            .unwrap_or(name)
            .trim();
        return Some(BotCommand::CreateMeet {
            name: if original.is_empty() {
                None
            } else {
                Some(original.to_string())
            },
        });
    }

    Some(BotCommand::Help)
}

/// Help text for direct messages: every verb
pub fn dm_help() -> &'static str {
    "Commands:\n\
     bot status - document and connection summary\n\
     bot create meet [name] - create a meeting link\n\
     bot login user admin - rotate and receive the admin account password\n\
     bot login ej admin - receive the stored ejabberd admin credentials"
}

/// Help text for rooms: credential verbs are DM-only
pub fn muc_help() -> &'static str {
    "Commands:\n\
     bot status - document and connection summary\n\
     bot create meet [name] - create a meeting link\n\
     (account commands are available in a direct message)"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_addressed() {
        assert_eq!(parse("hello world"), None);
        assert_eq!(parse("bots are cool"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_bare_bot_is_help() {
        assert_eq!(parse("bot"), Some(BotCommand::Help));
        assert_eq!(parse("  BOT  "), Some(BotCommand::Help));
    }

    #[test]
    fn test_status() {
        assert_eq!(parse("bot status"), Some(BotCommand::Status));
        assert_eq!(parse("Bot  STATUS"), Some(BotCommand::Status));
    }

    #[test]
    fn test_login_verbs() {
        assert_eq!(parse("bot login user admin"), Some(BotCommand::LoginUserAdmin));
        assert_eq!(parse("bot login ej admin"), Some(BotCommand::LoginEjAdmin));
    }

    #[test]
    fn test_create_meet() {
        assert_eq!(parse("bot create meet"), Some(BotCommand::CreateMeet { name: None }));
        assert_eq!(
            parse("bot create meet Standup"),
            Some(BotCommand::CreateMeet {
                name: Some("Standup".to_string())
            })
        );
    }

    #[test]
    fn test_unknown_verb_is_help() {
        assert_eq!(parse("bot dance"), Some(BotCommand::Help));
        assert_eq!(parse("bot create meeting"), Some(BotCommand::Help));
    }
}
