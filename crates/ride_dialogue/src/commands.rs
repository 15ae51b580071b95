//! Global commands, resolved before any state processing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::{normalize_answer, Commands};

static MATCH_COMMAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(approve|reject|share|hide|אשר|דחה)\s+([0-9a-f]{6})$")
        .expect("match command regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalCommand {
    Help,
    Restart,
    Back,
    DeleteData,
    RideFound,
    Approve(String),
    Reject(String),
    ShareName(String),
    HideName(String),
}

impl GlobalCommand {
    pub fn parse(text: &str, commands: &Commands) -> Option<Self> {
        let normalized = normalize_answer(text);
        let listed = |phrases: &[String]| {
            phrases
                .iter()
                .any(|phrase| normalize_answer(phrase) == normalized)
        };

        if listed(&commands.help) {
            return Some(GlobalCommand::Help);
        }
        if listed(&commands.restart) {
            return Some(GlobalCommand::Restart);
        }
        if listed(&commands.back) {
            return Some(GlobalCommand::Back);
        }
        if listed(&commands.delete_data) {
            return Some(GlobalCommand::DeleteData);
        }
        if listed(&commands.ride_found) {
            return Some(GlobalCommand::RideFound);
        }

        let caps = MATCH_COMMAND_RE.captures(&normalized)?;
        let code = caps[2].to_string();
        Some(match &caps[1] {
            "approve" | "אשר" => GlobalCommand::Approve(code),
            "reject" | "דחה" => GlobalCommand::Reject(code),
            "share" => GlobalCommand::ShareName(code),
            _ => GlobalCommand::HideName(code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_commands() {
        let commands = Commands::default();
        assert_eq!(GlobalCommand::parse(" Restart ", &commands), Some(GlobalCommand::Restart));
        assert_eq!(GlobalCommand::parse("חזור", &commands), Some(GlobalCommand::Back));
        assert_eq!(
            GlobalCommand::parse("Found a   ride", &commands),
            Some(GlobalCommand::RideFound)
        );
        assert_eq!(GlobalCommand::parse("restart please", &commands), None);
    }

    #[test]
    fn test_match_commands_carry_the_code() {
        let commands = Commands::default();
        assert_eq!(
            GlobalCommand::parse("approve 3f2a9c", &commands),
            Some(GlobalCommand::Approve("3f2a9c".to_string()))
        );
        assert_eq!(
            GlobalCommand::parse("דחה 3f2a9c", &commands),
            Some(GlobalCommand::Reject("3f2a9c".to_string()))
        );
        assert_eq!(
            GlobalCommand::parse("HIDE 00aa11", &commands),
            Some(GlobalCommand::HideName("00aa11".to_string()))
        );
        assert_eq!(GlobalCommand::parse("approve", &commands), None);
        assert_eq!(GlobalCommand::parse("approve 12345z", &commands), None);
    }
}
