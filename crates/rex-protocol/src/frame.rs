//! Protocol frame and command verb types.

use std::fmt;

use rex_core::ClientId;

/// Prefix every command line starts with.
pub const COMMAND_PREFIX: &str = "REX";

/// Command verbs understood by daemon and client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Registration request (client to daemon) or acknowledgement carrying
    /// the assigned id (daemon to client)
    Register,

    /// Liveness probe, daemon to client
    Ping,

    /// Optional probe answer, client to daemon
    Pong,

    /// Graceful goodbye, client to daemon
    Close,

    /// Anything else, kept verbatim for logging
    Unknown(String),
}

impl Verb {
    /// Parses a verb token. Matching is exact (upper case).
    pub fn parse(s: &str) -> Self {
        match s {
            "REGISTER" => Verb::Register,
            "PING" => Verb::Ping,
            "PONG" => Verb::Pong,
            "CLOSE" => Verb::Close,
            other => Verb::Unknown(other.to_string()),
        }
    }

    /// Returns the wire token for this verb.
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Register => "REGISTER",
            Verb::Ping => "PING",
            Verb::Pong => "PONG",
            Verb::Close => "CLOSE",
            Verb::Unknown(s) => s,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command_line: String,
    body: Vec<String>,
}

impl Frame {
    /// Creates a frame with an empty body.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            body: Vec::new(),
        }
    }

    /// Creates a frame with body lines.
    pub fn with_body(command_line: impl Into<String>, body: Vec<String>) -> Self {
        Self {
            command_line: command_line.into(),
            body,
        }
    }

    /// Builds `REX <VERB>[ <ARG>]*`.
    pub fn command(verb: Verb, args: &[&str]) -> Self {
        let mut line = format!("{COMMAND_PREFIX} {verb}");
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        Self::new(line)
    }

    /// `REX REGISTER`, sent by a client to ask for an id.
    pub fn register() -> Self {
        Self::command(Verb::Register, &[])
    }

    /// `REX REGISTER <id>`, sent by the daemon once the id is assigned.
    pub fn register_ack(id: &ClientId) -> Self {
        Self::command(Verb::Register, &[id.as_str()])
    }

    /// `REX PING`
    pub fn ping() -> Self {
        Self::command(Verb::Ping, &[])
    }

    /// `REX PONG`
    pub fn pong() -> Self {
        Self::command(Verb::Pong, &[])
    }

    /// `REX CLOSE`
    pub fn close() -> Self {
        Self::command(Verb::Close, &[])
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Returns the command verb.
    ///
    /// A command line that does not start with [`COMMAND_PREFIX`] yields
    /// `Verb::Unknown` holding the whole line.
    pub fn verb(&self) -> Verb {
        let mut tokens = self.command_line.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(COMMAND_PREFIX), Some(verb)) => Verb::parse(verb),
            _ => Verb::Unknown(self.command_line.clone()),
        }
    }

    /// Returns the space-separated arguments following the verb.
    pub fn args(&self) -> Vec<&str> {
        let mut tokens = self.command_line.split_whitespace();
        match tokens.next() {
            Some(COMMAND_PREFIX) => tokens.skip(1).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the first argument, if any.
    pub fn first_arg(&self) -> Option<&str> {
        self.args().into_iter().next()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line)?;
        if !self.body.is_empty() {
            write!(f, " (+{} body lines)", self.body.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_expected_command_lines() {
        assert_eq!(Frame::register().command_line(), "REX REGISTER");
        assert_eq!(Frame::ping().command_line(), "REX PING");
        assert_eq!(Frame::pong().command_line(), "REX PONG");
        assert_eq!(Frame::close().command_line(), "REX CLOSE");
        assert_eq!(
            Frame::register_ack(&ClientId::new("ab3F9k")).command_line(),
            "REX REGISTER ab3F9k"
        );
    }

    #[test]
    fn test_verb_parsing() {
        assert_eq!(Frame::new("REX REGISTER").verb(), Verb::Register);
        assert_eq!(Frame::new("REX PING").verb(), Verb::Ping);
        assert_eq!(Frame::new("REX PONG").verb(), Verb::Pong);
        assert_eq!(Frame::new("REX CLOSE").verb(), Verb::Close);
        assert_eq!(
            Frame::new("REX SUBSCRIBE x").verb(),
            Verb::Unknown("SUBSCRIBE".to_string())
        );
    }

    #[test]
    fn test_missing_prefix_is_unknown() {
        assert_eq!(
            Frame::new("GET / HTTP/1.1").verb(),
            Verb::Unknown("GET / HTTP/1.1".to_string())
        );
        assert_eq!(Frame::new("REX").verb(), Verb::Unknown("REX".to_string()));
        assert!(Frame::new("GET / HTTP/1.1").args().is_empty());
    }

    #[test]
    fn test_args() {
        let frame = Frame::new("REX REGISTER ab3F9k extra");
        assert_eq!(frame.args(), vec!["ab3F9k", "extra"]);
        assert_eq!(frame.first_arg(), Some("ab3F9k"));
        assert_eq!(Frame::ping().first_arg(), None);
    }

    #[test]
    fn test_verb_display_roundtrip() {
        for verb in [Verb::Register, Verb::Ping, Verb::Pong, Verb::Close] {
            assert_eq!(Verb::parse(&verb.to_string()), verb);
        }
    }
}
