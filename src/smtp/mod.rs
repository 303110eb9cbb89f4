//! SMTP: client-facing session and upstream submission
//!
//! The local client talks plaintext SMTP to the gateway and is
//! authenticated against the stored profiles. The gateway opens its
//! own upstream connection once a profile is bound, authenticates
//! with the stored credentials, and from then on relays the envelope
//! and message body.

mod command;
mod data;
mod reply;
mod session;
pub mod upstream;

pub use command::{SmtpCommand, extract_address};
pub use data::{RelayOutcome, detect_charset, relay_body};
pub use reply::{Reply, parse_reply_line};
pub use session::SmtpSession;
