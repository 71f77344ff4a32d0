use std::fmt;
use std::str::FromStr;

/// Commands every service implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Create,
    Update,
    Info,
    Start,
    Stop,
    Remove,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Create,
        Command::Update,
        Command::Info,
        Command::Start,
        Command::Stop,
        Command::Remove,
    ];

    /// Script and log base name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Update => "update",
            Command::Info => "info",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Remove => "remove",
        }
    }

    /// Whether the target service must already be listed on the control node.
    pub fn requires_listed_service(&self) -> bool {
        !matches!(self, Command::Create)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown service command '{s}' (expected: create, update, info, start, stop, remove)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_round_trip() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
        assert!("restart".parse::<Command>().is_err());
    }

    #[test]
    fn test_only_create_skips_listing() {
        let skipping: Vec<Command> = Command::ALL.into_iter().filter(|c| !c.requires_listed_service()).collect();
        assert_eq!(skipping, vec![Command::Create]);
    }
}
