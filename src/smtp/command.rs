//! Client-side SMTP command parsing

/// A command line received from the local SMTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand<'a> {
    Ehlo(&'a str),
    Helo(&'a str),
    Auth {
        mechanism: &'a str,
        initial_response: Option<&'a str>,
    },
    /// `address` is `None` when the argument could not be parsed.
    MailFrom { address: Option<String> },
    RcptTo,
    Data,
    Rset,
    Noop,
    StartTls,
    Quit,
    Unknown(&'a str),
}

impl<'a> SmtpCommand<'a> {
    #[must_use]
    pub fn parse(line: &'a str) -> Self {
        let (verb, args) = line
            .split_once(' ')
            .map_or((line, ""), |(v, a)| (v, a.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" => Self::Ehlo(args),
            "HELO" => Self::Helo(args),
            "AUTH" => {
                let mut words = args.split_whitespace();
                Self::Auth {
                    mechanism: words.next().unwrap_or(""),
                    initial_response: words.next(),
                }
            }
            "MAIL" if has_keyword(args, "FROM:") => Self::MailFrom {
                address: extract_address(&args[5..]),
            },
            "RCPT" if has_keyword(args, "TO:") => Self::RcptTo,
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "STARTTLS" => Self::StartTls,
            "QUIT" => Self::Quit,
            _ => Self::Unknown(verb),
        }
    }
}

fn has_keyword(args: &str, keyword: &str) -> bool {
    args.get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
}

/// The mailbox in a `MAIL FROM:` argument.
///
/// Takes the text between angle brackets when present, else the first
/// word. ESMTP parameters after the address are ignored. An empty
/// address (the null sender `<>`) yields `None`.
#[must_use]
pub fn extract_address(arg: &str) -> Option<String> {
    let arg = arg.trim();
    let address = match (arg.find('<'), arg.find('>')) {
        (Some(open), Some(close)) if open < close => &arg[open + 1..close],
        _ => arg.split_whitespace().next().unwrap_or(""),
    };
    let address = address.trim();
    (!address.is_empty()).then(|| address.to_string())
}
