//! Remote directory ensure: create and enter a hierarchy segment by
//! segment (FTP has no `mkdir -p`).

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::path_codec::{normalize_path, PathCodec, RemotePath};
use crate::ftp::session::FtpSession;
use crate::ftp::types::EnsureOutcome;

/// Make `target` exist and leave the session's working directory inside it.
///
/// A direct `CWD` to the full target is tried first. Otherwise each
/// segment is probed in the current directory, created when missing, and
/// entered. A refused `MKD` is recorded in `EnsureOutcome::failed` and the
/// walk carries on; a refused `CWD` ends it with `ProtocolError`.
pub async fn ensure_directory<S>(
    session: &mut S,
    codec: &PathCodec,
    target: &str,
) -> FtpResult<EnsureOutcome>
where
    S: FtpSession + ?Sized,
{
    let path = normalize_path(target);
    let mut outcome = EnsureOutcome::default();
    if path.is_root() {
        outcome.already_present = true;
        return Ok(outcome);
    }

    let wire = codec.encode_path(&path)?;
    if session.change_dir(&wire).await? {
        outcome.already_present = true;
        return Ok(outcome);
    }

    if path.absolute && !session.change_dir("/").await? {
        return Err(FtpError::protocol_error("Cannot enter the root directory"));
    }

    let mut walked = RemotePath {
        absolute: path.absolute,
        segments: Vec::with_capacity(path.segments.len()),
    };
    for segment in &path.segments {
        let wire_segment = codec.encode_segment(segment)?;
        walked.segments.push(segment.clone());
        let shown = walked.to_string();

        if segment_exists(session, &wire_segment).await? {
            outcome.existing.push(shown.clone());
        } else if session.make_dir(&wire_segment).await? {
            log::debug!("Created remote directory {}", shown);
            outcome.created.push(shown.clone());
        } else {
            log::warn!("Could not create remote directory {}; continuing", shown);
            outcome.failed.push(shown.clone());
        }

        if !session.change_dir(&wire_segment).await? {
            return Err(FtpError::protocol_error(format!(
                "Cannot enter remote directory {}",
                shown
            )));
        }
    }

    Ok(outcome)
}

/// Non-creating probe: does the current directory list `wire_name`?
/// A listing the server refuses counts as "missing".
async fn segment_exists<S>(session: &mut S, wire_name: &str) -> FtpResult<bool>
where
    S: FtpSession + ?Sized,
{
    match session.list(None).await {
        Ok(entries) => Ok(entries.iter().any(|e| e.name == wire_name)),
        Err(e) if e.is_session_fatal() => Err(e),
        Err(e) => {
            log::debug!("Listing for existence probe failed: {}", e);
            Ok(false)
        }
    }
}
