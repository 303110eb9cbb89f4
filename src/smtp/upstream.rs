//! Opening an authenticated upstream SMTP connection

use super::Reply;
use crate::auth;
use crate::config::{SmtpSecurity, UpstreamCredentials};
use crate::error::{Error, Result};
use crate::link::{Transport, UpstreamLink};
use crate::tls::TlsContext;
use std::time::Duration;
use tracing::{debug, info};

/// Connect to the SMTP upstream of `cred` and authenticate.
///
/// With [`SmtpSecurity::Starttls`] the sequence is greeting, `EHLO`,
/// `STARTTLS` (must answer `220`), TLS handshake, `EHLO` again, then
/// `AUTH LOGIN`. A `STARTTLS` refusal aborts before any handshake.
/// On failure the link is closed.
///
/// # Errors
///
/// Returns an error if connecting, STARTTLS or `AUTH LOGIN` fails.
pub async fn connect(
    cred: &UpstreamCredentials,
    tls: &TlsContext,
    read_timeout: Duration,
    ehlo_name: &str,
) -> Result<UpstreamLink> {
    let security = cred.smtp_security();
    let transport = match security {
        SmtpSecurity::Implicit => Transport::Tls,
        SmtpSecurity::Starttls | SmtpSecurity::Plain => Transport::Plain,
    };
    let connector = tls.connector(cred.accept_invalid_certs);

    let mut link = UpstreamLink::connect(&cred.host, cred.port, transport, connector, read_timeout).await?;

    let outcome = async {
        let greeting = Reply::read(&mut link).await?;
        if greeting.code != 220 {
            return Err(Error::Protocol(format!(
                "unexpected SMTP greeting: {}",
                greeting.last_line()
            )));
        }

        ehlo(&mut link, ehlo_name).await?;

        if security == SmtpSecurity::Starttls {
            debug!("PROXY -> SMTP-SERVER: STARTTLS");
            link.write_line("STARTTLS").await?;
            let reply = Reply::read(&mut link).await?;
            if reply.code != 220 {
                return Err(Error::Protocol(format!(
                    "STARTTLS refused: {}",
                    reply.last_line()
                )));
            }
            link.upgrade_to_tls(&cred.host, connector).await?;
            ehlo(&mut link, ehlo_name).await?;
        }

        auth::smtp_auth_login(&mut link, cred).await
    }
    .await;

    match outcome {
        Ok(()) => {
            info!(
                "Upstream SMTP session ready at {} ({:?}, tls={})",
                link.peer(),
                security,
                link.is_tls()
            );
            Ok(link)
        }
        Err(e) => {
            link.close().await;
            Err(e)
        }
    }
}

async fn ehlo(link: &mut UpstreamLink, name: &str) -> Result<Reply> {
    debug!("PROXY -> SMTP-SERVER: EHLO {}", name);
    link.write_line(&format!("EHLO {name}")).await?;
    let reply = Reply::read(link).await?;
    if reply.code == 250 {
        Ok(reply)
    } else {
        Err(Error::Protocol(format!("EHLO refused: {}", reply.last_line())))
    }
}
