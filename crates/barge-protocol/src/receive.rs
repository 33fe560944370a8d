//! `POST git-receive-pack`: commands, packfile, report-status.
//!
//! The body is pkt-line command lines terminated by a flush, then the raw
//! packfile. The pack is staged and indexed before any ref moves; ref
//! updates then run as a two-phase transaction.

use crate::Result;
use barge_git::pktline::{Packet, PktReader, PktWriter};
use barge_git::{GitError, Oid, RefResult, RefStatus, RefUpdate, Repository};

/// One parsed command line: either a well-formed update or a line whose
/// failure is reported per-ref instead of aborting the push.
#[derive(Debug)]
enum ParsedCommand {
    Update(RefUpdate),
    Invalid { name: String, reason: String },
}

/// The decoded request: commands, capabilities, pack bytes.
///
/// The server drives the phases separately so packfile indexing can run
/// under its own deadline: [`ReceiveRequest::parse`], then indexing of
/// [`take_pack`](ReceiveRequest::take_pack) via the repository, then
/// [`apply_and_report`].
#[derive(Debug, Default)]
pub struct ReceiveRequest {
    commands: Vec<ParsedCommand>,
    capabilities: Vec<String>,
    pack: Vec<u8>,
}

impl ReceiveRequest {
    /// Parses the pkt-line command section; the bytes after the flush are
    /// the packfile.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PktReader::new(body);
        let mut request = Self::default();
        let mut first = true;

        while let Some(pkt) = reader.next()? {
            match pkt {
                Packet::Flush => break,
                Packet::Data(data) => {
                    let line = String::from_utf8_lossy(&data);
                    let line = line.trim_end_matches('\n');

                    // Capabilities ride after NUL on the first command line.
                    let (command_part, caps) = match line.split_once('\0') {
                        Some((cmd, caps)) => (cmd, Some(caps)),
                        None => (line, None),
                    };
                    if first {
                        if let Some(caps) = caps {
                            request.capabilities =
                                caps.split_whitespace().map(str::to_string).collect();
                        }
                    }
                    first = false;

                    request.commands.push(parse_command(command_part));
                }
                _ => continue,
            }
        }

        request.pack = reader.rest().to_vec();
        Ok(request)
    }

    /// True when the body carried a packfile.
    pub fn has_pack(&self) -> bool {
        !self.pack.is_empty()
    }

    /// Detaches the pack bytes so indexing can run on another thread.
    pub fn take_pack(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pack)
    }

    /// True when the client asked for all-or-nothing semantics.
    pub fn atomic(&self) -> bool {
        self.capabilities.iter().any(|c| c == "atomic")
    }
}

fn parse_command(line: &str) -> ParsedCommand {
    let mut parts = line.splitn(3, ' ');
    let (Some(old), Some(new), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return ParsedCommand::Invalid {
            name: line.to_string(),
            reason: "malformed command line".to_string(),
        };
    };
    let old = match Oid::from_hex(old) {
        Ok(oid) => oid,
        Err(e) => {
            return ParsedCommand::Invalid {
                name: name.to_string(),
                reason: format!("failed to update: {}", e),
            }
        }
    };
    let new = match Oid::from_hex(new) {
        Ok(oid) => oid,
        Err(e) => {
            return ParsedCommand::Invalid {
                name: name.to_string(),
                reason: format!("failed to update: {}", e),
            }
        }
    };
    ParsedCommand::Update(RefUpdate {
        old,
        new,
        name: name.to_string(),
    })
}

/// Serves one receive-pack request, returning the report-status body.
///
/// The pack is indexed before any ref moves; callers that need a separate
/// indexing deadline drive the phases themselves instead.
pub fn receive_pack(repo: &Repository, body: &[u8]) -> Result<Vec<u8>> {
    let mut request = ReceiveRequest::parse(body)?;
    if request.has_pack() {
        let pack = request.take_pack();
        if let Err(e) = repo.add_pack(&pack) {
            return unpack_failure_report(&e);
        }
    }
    apply_and_report(repo, &request)
}

/// Builds the report for a push whose pack failed to index: `unpack <msg>`
/// with no per-ref statuses, since no ref was touched.
pub fn unpack_failure_report(error: &GitError) -> Result<Vec<u8>> {
    let message = match error {
        GitError::UnpackFailed(msg) => msg.clone(),
        other => other.to_string(),
    };
    tracing::info!(error = %message, "push rejected at unpack");
    build_report_status(Some(&message), &[])
}

/// Validates and applies the ref commands of an already-unpacked request,
/// then builds the report-status body.
pub fn apply_and_report(repo: &Repository, request: &ReceiveRequest) -> Result<Vec<u8>> {
    let atomic = request.atomic();

    let mut updates = Vec::new();
    let mut prefailed = false;
    for command in &request.commands {
        match command {
            ParsedCommand::Update(update) => updates.push(update.clone()),
            ParsedCommand::Invalid { .. } => prefailed = true,
        }
    }

    let applied = if atomic && prefailed {
        // A command we could not even parse fails the transaction; nothing
        // is validated or applied.
        updates
            .iter()
            .map(|u| RefResult {
                name: u.name.clone(),
                status: RefStatus::Failed("atomic transaction failed".to_string()),
            })
            .collect()
    } else {
        repo.apply_ref_updates(&updates, atomic)
    };

    // Re-interleave results with the pre-failed command lines, preserving
    // request order.
    let mut applied_iter = applied.into_iter();
    let mut results = Vec::with_capacity(request.commands.len());
    for command in &request.commands {
        match command {
            ParsedCommand::Update(_) => {
                if let Some(result) = applied_iter.next() {
                    results.push(result);
                }
            }
            ParsedCommand::Invalid { name, reason } => results.push(RefResult {
                name: name.clone(),
                status: RefStatus::Failed(reason.clone()),
            }),
        }
    }

    for result in &results {
        match &result.status {
            RefStatus::Ok => tracing::info!(refname = %result.name, "ref updated"),
            RefStatus::Failed(reason) => {
                tracing::info!(refname = %result.name, reason = %reason, "ref update rejected")
            }
        }
    }

    build_report_status(None, &results)
}

/// Builds the report-status body: `unpack ok`/`unpack <err>`, one line per
/// ref result, flush.
fn build_report_status(unpack_error: Option<&str>, results: &[RefResult]) -> Result<Vec<u8>> {
    let mut out = PktWriter::new();
    match unpack_error {
        None => out.line("unpack ok")?,
        Some(msg) => out.line(&format!("unpack {}", msg))?,
    }
    for result in results {
        match &result.status {
            RefStatus::Ok => out.line(&format!("ok {}", result.name))?,
            RefStatus::Failed(reason) => {
                out.line(&format!("ng {} {}", result.name, reason))?
            }
        }
    }
    out.flush();
    Ok(out.into_bytes())
}

/// Assembles a receive-pack request body the way a push client does; used
/// by the test suites.
pub fn build_request(commands: &[(Oid, Oid, &str)], caps: &str, pack: &[u8]) -> Result<Vec<u8>> {
    let mut out = PktWriter::new();
    for (index, (old, new, name)) in commands.iter().enumerate() {
        if index == 0 && !caps.is_empty() {
            out.line(&format!("{} {} {}\0{}", old, new, name, caps))?;
        } else {
            out.line(&format!("{} {} {}", old, new, name))?;
        }
    }
    out.flush();
    let mut body = out.into_bytes();
    body.extend_from_slice(pack);
    Ok(body)
}
