//! Per-connection receive loop: frame products off the wire, persist
//! each one via the configured store backend, and ack it.
//!
//! Grounded in `serv_recv.c`'s `service`/`recv_msghdr`/`recv_prod`:
//! `service` tracks a local expected seqno starting at zero, and
//! `recv_msghdr` rejects any incoming seqno that isn't either that
//! expected value or exactly zero (the client resets its counter to
//! zero on every reconnect, so zero is always accepted as a resync
//! point). A mismatch is a fatal protocol error -- the connection is
//! torn down without sending an ack for that frame.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::defaults::{self, ACK_MSG_LEN, CONN_MSG_START, LINK_ID, PROD_HDR_LEN, REMOTE_ID, SOURCE_ID};
use crate::framing::{self, AckCode, HEADER_LEN};
use crate::logging::PRODUCT_LOG_TARGET;
use crate::store::{OutputStoreBackend, StoreMeta};

/// Fields parsed out of a `CONNECTION MESSAGE` body, carried across the
/// life of the connection (`serv_recv.c`'s `ConnInfo`).
#[derive(Debug, Default, Clone)]
struct ConnInfo {
    source: Option<String>,
    remote: Option<String>,
    link: Option<String>,
}

/// Number of persist attempts before giving up and acking `Retry`
/// (one immediate try, then backoff retries).
const MAX_PERSIST_ATTEMPTS: u32 = 4;

/// Drive one accepted connection until it closes, a frame is malformed,
/// or a read times out.
pub async fn serve(
    mut stream: TcpStream,
    peer: String,
    cfg: Arc<ServerConfig>,
    store: Arc<dyn OutputStoreBackend>,
) -> Result<()> {
    let mut conn_info = ConnInfo::default();
    let mut header_buf = [0u8; HEADER_LEN];
    // Reset on every accepted connection, mirroring `service()`'s local
    // `seqno` (the client resets its own counter to 0 on connect too).
    let mut expected_seqno: u32 = 0;

    loop {
        match tokio::time::timeout(cfg.socket_timeout, stream.read_exact(&mut header_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(peer = %peer, "connection closed by peer");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e).context("reading message/product header"),
            Err(_) => {
                warn!(peer = %peer, "socket read timed out, dropping connection");
                return Ok(());
            }
        }

        let parsed = match framing::parse_header(&header_buf) {
            Ok(p) => p,
            Err(e) => {
                warn!(peer = %peer, error = %e, "malformed header, dropping connection");
                return Ok(());
            }
        };

        if parsed.seqno != expected_seqno && parsed.seqno != 0 {
            warn!(
                peer = %peer,
                expected = expected_seqno,
                got = parsed.seqno,
                "out-of-order seqno, dropping connection"
            );
            return Ok(());
        }

        let body_len = (parsed.size as usize).saturating_sub(PROD_HDR_LEN);
        let mut body = vec![0u8; body_len];
        tokio::time::timeout(cfg.socket_timeout, stream.read_exact(&mut body))
            .await
            .context("reading product body timed out")?
            .context("reading product body")?;

        expected_seqno = parsed.seqno + 1;

        let heading = crate::wmo::parse_wmo(&body).unwrap_or_default();

        let is_connection_message = parsed.seqno == 0
            && cfg
                .connection_wmo
                .as_deref()
                .map(|expected| heading.ttaaii == expected)
                .unwrap_or(false);

        if is_connection_message {
            match parse_conn_msg(&body) {
                Some(info) => {
                    info!(
                        target: PRODUCT_LOG_TARGET,
                        "CONNECT WMO[{} {} {} {}] REMOTE={} SOURCE={} LINK={}",
                        heading.ttaaii,
                        heading.cccc,
                        heading.ddhhmm,
                        heading.bbb,
                        info.remote.as_deref().unwrap_or(&peer),
                        info.source.as_deref().unwrap_or(""),
                        info.link.as_deref().unwrap_or(""),
                    );
                    conn_info = info;
                    send_ack(&mut stream, cfg.socket_timeout, parsed.seqno, AckCode::Ok).await?;
                }
                None => {
                    warn!(peer = %peer, "unparseable connection message");
                    send_ack(&mut stream, cfg.socket_timeout, parsed.seqno, AckCode::Fail).await?;
                }
            }
            continue;
        }

        let meta = StoreMeta {
            seqno: parsed.seqno,
            heading: heading.clone(),
            source: conn_info.source.clone(),
        };

        let ack_code = match persist_with_retry(store.as_ref(), &body, &meta, &peer).await {
            Ok(path) => {
                if cfg.toggle_perms {
                    if let Err(e) = set_public_perms(&path).await {
                        warn!(peer = %peer, path = %path.display(), error = %e, "toggling output file permissions");
                    }
                }
                AckCode::Ok
            }
            Err(code) => code,
        };

        info!(
            target: PRODUCT_LOG_TARGET,
            "RECV #{} bytes({}) WMO[{} {} {}] ack={:?}",
            parsed.seqno,
            body.len(),
            heading.ttaaii,
            heading.cccc,
            heading.ddhhmm,
            ack_code
        );

        send_ack(&mut stream, cfg.socket_timeout, parsed.seqno, ack_code).await?;
    }
}

/// Persist `body`, retrying transient filesystem errors with the same
/// short-then-long backoff as `serv_recv.c`'s `open_out_file`.
async fn persist_with_retry(
    store: &dyn OutputStoreBackend,
    body: &[u8],
    meta: &StoreMeta,
    peer: &str,
) -> Result<PathBuf, AckCode> {
    let mut attempt = 0u32;
    loop {
        match store.store(body, meta).await {
            Ok(path) => return Ok(path),
            Err(e) => {
                attempt += 1;
                let io_kind = e.downcast_ref::<std::io::Error>().map(|e| e.kind());
                match io_kind {
                    Some(std::io::ErrorKind::NotFound) => {
                        warn!(peer = %peer, error = %e, attempt, "output path missing, retrying");
                    }
                    Some(std::io::ErrorKind::StorageFull) | Some(std::io::ErrorKind::OutOfMemory) => {
                        warn!(peer = %peer, error = %e, attempt, "transient storage pressure, retrying");
                    }
                    Some(_) => {
                        warn!(peer = %peer, error = %e, attempt, "transient I/O error, retrying");
                    }
                    None => {
                        // Not a raw I/O error (e.g. overwrite protection): permanent.
                        warn!(peer = %peer, error = %e, "permanent store failure");
                        return Err(AckCode::Fail);
                    }
                }
                if attempt >= MAX_PERSIST_ATTEMPTS {
                    return Err(AckCode::Retry);
                }
                let sleep_for = if attempt <= 3 {
                    defaults::SHORT_RETRY_SLEEP
                } else {
                    defaults::LONG_RETRY_SLEEP
                };
                tokio::time::sleep(sleep_for).await;
            }
        }
    }
}

#[cfg(unix)]
async fn set_public_perms(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(defaults::PUBLIC_FILE_PERMS))
        .await
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
async fn set_public_perms(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

async fn send_ack(stream: &mut TcpStream, timeout: Duration, seqno: u32, code: AckCode) -> Result<()> {
    let mut buf = [0u8; ACK_MSG_LEN];
    framing::format_ack(&mut buf, seqno, code).context("formatting ack")?;
    tokio::time::timeout(timeout, async {
        stream.write_all(&buf).await?;
        stream.flush().await
    })
    .await
    .context("sending ack timed out")?
    .context("writing ack")?;
    Ok(())
}

/// Parse a `"CONNECTION MESSAGE\r\r\n<TOKEN> <value>\r\r\n..."` body
/// (`serv_recv.c`'s `parse_conn_msg`), returning `None` if the leading
/// marker line doesn't match.
fn parse_conn_msg(body: &[u8]) -> Option<ConnInfo> {
    let text = String::from_utf8_lossy(body);
    let mut lines = text.split("\r\r\n");
    if lines.next()?.trim() != CONN_MSG_START {
        return None;
    }

    let mut info = ConnInfo::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        let token = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("").trim().to_string();
        if token == SOURCE_ID {
            info.source = Some(value);
        } else if token == REMOTE_ID {
            info.remote = Some(value);
        } else if token == LINK_ID {
            info.link = Some(value);
        }
    }
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_conn_msg_extracts_all_tokens() {
        let body = format!(
            "{}\r\r\n{} upstream-src\r\r\n{} 10.0.0.5\r\r\n{} 7\r\r\n",
            CONN_MSG_START, SOURCE_ID, REMOTE_ID, LINK_ID
        );
        let info = parse_conn_msg(body.as_bytes()).unwrap();
        assert_eq!(info.source.as_deref(), Some("upstream-src"));
        assert_eq!(info.remote.as_deref(), Some("10.0.0.5"));
        assert_eq!(info.link.as_deref(), Some("7"));
    }

    #[test]
    fn parse_conn_msg_rejects_wrong_marker() {
        assert!(parse_conn_msg(b"NOT A CONNECTION MESSAGE\r\r\n").is_none());
    }

    #[test]
    fn parse_conn_msg_tolerates_missing_tokens() {
        let body = format!("{}\r\r\n{} only-source\r\r\n", CONN_MSG_START, SOURCE_ID);
        let info = parse_conn_msg(body.as_bytes()).unwrap();
        assert_eq!(info.source.as_deref(), Some("only-source"));
        assert!(info.remote.is_none());
        assert!(info.link.is_none());
    }
}
