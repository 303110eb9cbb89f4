//! Client-side POP3 command parsing

/// A parsed POP3 command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop3Command {
    User(String),
    /// The password text is kept but never checked.
    Pass(String),
    Stat,
    List(Option<u32>),
    Uidl(Option<u32>),
    Retr(u32),
    Top { msg: u32, lines: u32 },
    Dele(u32),
    Noop,
    Rset,
    Quit,
    Capa,
    Unknown(String),
}

/// Why a command line could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidSyntax,
    InvalidLineCount,
}

impl ParseError {
    /// The `-ERR` line sent back to the client.
    #[must_use]
    pub const fn reply(self) -> &'static str {
        match self {
            Self::InvalidSyntax => "-ERR Invalid syntax",
            Self::InvalidLineCount => "-ERR Invalid line count",
        }
    }
}

impl Pop3Command {
    /// Parse one client line. The verb is case-insensitive; an unknown
    /// verb parses as [`Pop3Command::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns an error if a known verb has missing or malformed
    /// arguments.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (verb, args) = line
            .trim()
            .split_once(' ')
            .map_or((line.trim(), ""), |(v, a)| (v, a.trim()));
        let mut words = args.split_whitespace();

        let command = match verb.to_ascii_uppercase().as_str() {
            "USER" if args.is_empty() => return Err(ParseError::InvalidSyntax),
            "USER" => Self::User(args.to_string()),
            "PASS" => Self::Pass(args.to_string()),
            "STAT" => Self::Stat,
            "LIST" => Self::List(optional_number(words.next())?),
            "UIDL" => Self::Uidl(optional_number(words.next())?),
            "RETR" => Self::Retr(required_number(words.next())?),
            "DELE" => Self::Dele(required_number(words.next())?),
            "TOP" => {
                let msg = required_number(words.next())?;
                let lines = words
                    .next()
                    .ok_or(ParseError::InvalidSyntax)?
                    .parse()
                    .map_err(|_| ParseError::InvalidLineCount)?;
                Self::Top { msg, lines }
            }
            "NOOP" => Self::Noop,
            "RSET" => Self::Rset,
            "QUIT" => Self::Quit,
            "CAPA" => Self::Capa,
            _ => Self::Unknown(verb.to_string()),
        };
        Ok(command)
    }

    /// Whether a positive answer spans several lines ending in `.`.
    #[must_use]
    pub const fn is_multiline(&self) -> bool {
        matches!(
            self,
            Self::List(None) | Self::Uidl(None) | Self::Retr(_) | Self::Top { .. } | Self::Capa
        )
    }

    /// The command name, for logs that must not show arguments.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::User(_) => "USER",
            Self::Pass(_) => "PASS",
            Self::Stat => "STAT",
            Self::List(_) => "LIST",
            Self::Uidl(_) => "UIDL",
            Self::Retr(_) => "RETR",
            Self::Top { .. } => "TOP",
            Self::Dele(_) => "DELE",
            Self::Noop => "NOOP",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
            Self::Capa => "CAPA",
            Self::Unknown(_) => "unknown",
        }
    }
}

fn required_number(word: Option<&str>) -> Result<u32, ParseError> {
    word.ok_or(ParseError::InvalidSyntax)?
        .parse()
        .map_err(|_| ParseError::InvalidSyntax)
}

fn optional_number(word: Option<&str>) -> Result<Option<u32>, ParseError> {
    word.map(|w| w.parse().map_err(|_| ParseError::InvalidSyntax))
        .transpose()
}
