//! Text commands typed in the guild.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Join the author's voice channel.
    Join,
    /// Join the author's voice channel if needed and play both tones.
    Beep,
}

impl Command {
    pub fn parse(content: &str) -> Option<Self> {
        match content.trim() {
            "/join" => Some(Self::Join),
            "/beep" => Some(Self::Beep),
            _ => None,
        }
    }
}

pub const NOT_IN_VOICE: &str = "Join a voice channel first.";
pub const BEEP_REPLY: &str = "Beep.";

pub fn joined_reply(channel_name: &str) -> String {
    format!("Joined {channel_name}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_commands_only() {
        assert_eq!(Command::parse("  /join "), Some(Command::Join));
        assert_eq!(Command::parse("/beep"), Some(Command::Beep));
        assert_eq!(Command::parse("/join now"), None);
        assert_eq!(Command::parse("/JOIN"), None);
    }
}
