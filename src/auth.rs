//! Login handshakes against upstream servers
//!
//! Each function performs exactly one attempt with the credentials it
//! is given. A refusal is reported as [`Error::AuthFailed`]; callers
//! close the link and never retry with another profile.

use crate::config::UpstreamCredentials;
use crate::error::{Error, Result};
use crate::imap::{self, TagCounter};
use crate::link::UpstreamLink;
use crate::smtp::Reply;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

/// POP3 `USER` / `PASS`. Any `-ERR` fails the login.
///
/// # Errors
///
/// Returns an error if the link fails or the server answers `USER` or `PASS`
/// with `-ERR`.
pub async fn pop3_login(link: &mut UpstreamLink, cred: &UpstreamCredentials) -> Result<()> {
    debug!("PROXY -> POP3-SERVER: USER {}", cred.username);
    link.write_line(&format!("USER {}", cred.username)).await?;
    let reply = link.read_line().await?;
    debug!("POP3-SERVER -> PROXY: {}", reply);
    if reply.starts_with("-ERR") {
        return Err(Error::AuthFailed(format!("USER refused: {reply}")));
    }

    debug!("PROXY -> POP3-SERVER: PASS [hidden]");
    link.write_line(&format!("PASS {}", cred.password)).await?;
    let reply = link.read_line().await?;
    debug!("POP3-SERVER -> PROXY: {}", reply);
    if reply.starts_with("-ERR") {
        return Err(Error::AuthFailed(format!("PASS refused: {reply}")));
    }
    Ok(())
}

/// IMAP `LOGIN` under the next tag of `tags`.
///
/// # Errors
///
/// Returns an error if the link fails or `LOGIN` does not complete with `OK`.
pub async fn imap_login(
    link: &mut UpstreamLink,
    tags: &mut TagCounter,
    cred: &UpstreamCredentials,
) -> Result<()> {
    let response = imap::login(link, tags, &cred.username, &cred.password).await?;
    if response.is_ok() {
        debug!("IMAP login accepted for {}", cred.username);
        Ok(())
    } else {
        Err(Error::AuthFailed(format!(
            "LOGIN {} {}",
            response.status.as_str(),
            response.text
        )))
    }
}

/// SMTP `AUTH LOGIN`: two `334` challenges, then `235` on success.
///
/// # Errors
///
/// Returns an error if the link fails or any step of the exchange gets an
/// unexpected reply code.
pub async fn smtp_auth_login(link: &mut UpstreamLink, cred: &UpstreamCredentials) -> Result<()> {
    debug!("PROXY -> SMTP-SERVER: AUTH LOGIN");
    link.write_line("AUTH LOGIN").await?;
    expect_code(link, 334, "AUTH LOGIN").await?;

    debug!("PROXY -> SMTP-SERVER: [username]");
    link.write_line(&BASE64.encode(&cred.username)).await?;
    expect_code(link, 334, "username").await?;

    debug!("PROXY -> SMTP-SERVER: [password]");
    link.write_line(&BASE64.encode(&cred.password)).await?;
    expect_code(link, 235, "password").await?;

    debug!("SMTP login accepted for {}", cred.username);
    Ok(())
}

async fn expect_code(link: &mut UpstreamLink, code: u16, step: &str) -> Result<()> {
    let reply = Reply::read(link).await?;
    if reply.code == code {
        Ok(())
    } else {
        Err(Error::AuthFailed(format!(
            "{step}: expected {code}, got {}",
            reply.last_line()
        )))
    }
}
