use async_trait::async_trait;
use colored::Colorize;
use ride_core::{ChannelError, OutboundChannel};

/// Prints every outbound notification to stdout.
#[derive(Debug, Default)]
pub struct TerminalChannel;

#[async_trait]
impl OutboundChannel for TerminalChannel {
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        choices: Option<&[String]>,
    ) -> Result<bool, ChannelError> {
        println!("{}", format!("[to {recipient}]").magenta().bold());
        println!("{}", text.magenta());
        if let Some(choices) = choices {
            println!("{}", format_choices(choices).dimmed());
        }
        Ok(true)
    }
}

pub fn format_choices(choices: &[String]) -> String {
    choices
        .iter()
        .map(|choice| format!("[{choice}]"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_choices() {
        let choices = vec!["approve 3f2a9c".to_string(), "reject 3f2a9c".to_string()];
        assert_eq!(format_choices(&choices), "[approve 3f2a9c] [reject 3f2a9c]");
        assert_eq!(format_choices(&[]), "");
    }

    #[tokio::test]
    async fn test_terminal_channel_always_delivers() {
        let delivered = TerminalChannel.send("972500000001", "hello", None).await;
        assert!(matches!(delivered, Ok(true)));
    }
}
