//! Direct POP3 backend
//!
//! When a profile only has POP3 credentials, transaction commands are
//! forwarded verbatim to the upstream POP3 server and its responses
//! are returned byte for byte. The upstream already byte-stuffs its
//! multi-line responses, so nothing is rewritten.

use crate::auth;
use crate::config::UpstreamCredentials;
use crate::error::{Error, Result};
use crate::link::{UpstreamLink, trim_line_end};
use tracing::debug;

pub struct Pop3Relay {
    link: UpstreamLink,
}

impl Pop3Relay {
    /// Read the greeting and log in with the stored credentials.
    ///
    /// On failure the link is closed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting is not `+OK` or the login is refused.
    pub async fn login(mut link: UpstreamLink, cred: &UpstreamCredentials) -> Result<Self> {
        let outcome = async {
            let greeting = link.read_line().await?;
            debug!("POP3-SERVER -> PROXY: {}", greeting);
            if !greeting.starts_with("+OK") {
                return Err(Error::Protocol(format!("unexpected POP3 greeting: {greeting}")));
            }
            auth::pop3_login(&mut link, cred).await
        }
        .await;

        match outcome {
            Ok(()) => Ok(Self { link }),
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    /// Send `line` and return the complete response as received.
    ///
    /// When `multiline` is set and the status is `+OK`, lines are read
    /// up to and including the terminating `.`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails before the response is complete.
    pub async fn forward(&mut self, line: &str, multiline: bool) -> Result<Vec<u8>> {
        debug!("PROXY -> POP3-SERVER: {}", line);
        self.link.write_line(line).await?;

        let mut response = self.link.read_line_bytes().await?;
        debug!(
            "POP3-SERVER -> PROXY: {}",
            String::from_utf8_lossy(trim_line_end(&response))
        );
        if !multiline || !response.starts_with(b"+OK") {
            return Ok(response);
        }

        loop {
            let line = self.link.read_line_bytes().await?;
            let done = trim_line_end(&line) == b".";
            response.extend_from_slice(&line);
            if done {
                return Ok(response);
            }
        }
    }

    /// Forward `QUIT`, return the server's answer and close the link.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails before `QUIT` is answered.
    pub async fn quit(mut self) -> Result<Vec<u8>> {
        let response = self.forward("QUIT", false).await;
        self.link.close().await;
        response
    }

    pub async fn close(mut self) {
        self.link.close().await;
    }
}
