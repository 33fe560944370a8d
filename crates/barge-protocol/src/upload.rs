//! `POST git-upload-pack`: the protocol v2 command stream.
//!
//! A request is a capability section (`command=…`, `agent=…`), a delim, the
//! command arguments, then a flush. `ls-refs` and `fetch` are supported.

use crate::{Result, AGENT};
use barge_git::pktline::{self, Packet, PktReader, PktWriter, BAND_DATA, BAND_ERROR, BAND_PROGRESS};
use barge_git::{pack, GitError, ObjectKind, Oid, Repository};

/// A parsed v2 request envelope.
#[derive(Debug, Default)]
struct V2Request {
    command: Option<String>,
    args: Vec<String>,
}

fn parse_v2(body: &[u8]) -> Result<V2Request> {
    let mut reader = PktReader::new(body);
    let mut request = V2Request::default();
    let mut in_args = false;

    while let Some(pkt) = reader.next()? {
        match pkt {
            Packet::Delim => in_args = true,
            Packet::Flush | Packet::ResponseEnd => break,
            Packet::Data(_) => {
                let Some(text) = pkt.as_text() else { continue };
                if in_args {
                    request.args.push(text.to_string());
                } else if let Some(cmd) = text.strip_prefix("command=") {
                    request.command = Some(cmd.to_string());
                }
                // Other capability lines (agent=, object-format=) are
                // accepted and ignored.
            }
            Packet::Error(_) => {}
        }
    }
    Ok(request)
}

/// Serves one upload-pack request, returning the response body.
///
/// Protocol-level problems (unknown command, unreadable want) are answered
/// on the wire rather than surfaced as errors.
pub fn upload_pack(repo: &Repository, body: &[u8]) -> Result<Vec<u8>> {
    let request = parse_v2(body)?;
    match request.command.as_deref() {
        Some("ls-refs") => ls_refs(repo, &request.args),
        Some("fetch") => fetch(repo, &request.args),
        other => {
            let name = other.unwrap_or("<none>");
            tracing::debug!(command = name, "rejecting unknown upload-pack command");
            let mut out = PktWriter::new();
            out.data(format!("ERR unknown command {}", name).as_bytes())?;
            out.flush();
            Ok(out.into_bytes())
        }
    }
}

// ---- ls-refs -----------------------------------------------------------

#[derive(Debug, Default)]
struct LsRefsArgs {
    peel: bool,
    symrefs: bool,
    prefixes: Vec<String>,
}

impl LsRefsArgs {
    fn parse(args: &[String]) -> Self {
        let mut parsed = Self::default();
        for arg in args {
            match arg.as_str() {
                "peel" => parsed.peel = true,
                "symrefs" => parsed.symrefs = true,
                other => {
                    if let Some(prefix) = other.strip_prefix("ref-prefix ") {
                        parsed.prefixes.push(prefix.to_string());
                    }
                }
            }
        }
        parsed
    }

    fn matches(&self, name: &str) -> bool {
        // HEAD is always reported; clients that filter by ref-prefix still
        // need it to pick a default branch.
        name == "HEAD"
            || self.prefixes.is_empty()
            || self.prefixes.iter().any(|p| name.starts_with(p))
    }
}

fn ls_refs(repo: &Repository, args: &[String]) -> Result<Vec<u8>> {
    let args = LsRefsArgs::parse(args);
    let listing = repo.list_refs()?;

    let mut out = PktWriter::new();
    for (name, oid) in &listing.refs {
        if !args.matches(name) {
            continue;
        }
        let mut line = format!("{} {}", oid, name);
        if args.symrefs && name == "HEAD" {
            if let Some(target) = &listing.symbolic_head {
                line.push_str(&format!(" symref-target:{}", target));
            }
        }
        out.line(&line)?;

        if args.peel && name.starts_with("refs/tags/") {
            if let Some(peeled) = peel_tag(repo, oid)? {
                out.line(&format!("{} {}^{{}}", peeled, name))?;
            }
        }
    }
    out.flush();
    Ok(out.into_bytes())
}

/// Follows annotated tags to the first non-tag object. Returns `None` for
/// lightweight tags (nothing to peel).
fn peel_tag(repo: &Repository, oid: &Oid) -> Result<Option<Oid>> {
    let mut current = *oid;
    let mut peeled = None;
    for _ in 0..8 {
        let obj = match repo.read_object(&current) {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => return Ok(peeled),
            Err(e) => return Err(e.into()),
        };
        if obj.kind != ObjectKind::Tag {
            return Ok(peeled);
        }
        current = obj.as_tag()?.object;
        peeled = Some(current);
    }
    Ok(peeled)
}

// ---- fetch -------------------------------------------------------------

/// Parsed `fetch` arguments. Shallow and filter arguments are accepted but
/// the response is always a full-history pack.
#[derive(Debug, Default)]
pub struct FetchArgs {
    pub wants: Vec<Oid>,
    pub haves: Vec<Oid>,
    pub done: bool,
    pub thin_pack: bool,
    pub no_progress: bool,
    pub include_tag: bool,
    pub ofs_delta: bool,
    pub sideband_all: bool,
    pub shallow: Vec<Oid>,
    pub deepen: Option<u32>,
    pub deepen_relative: bool,
    pub deepen_since: Option<i64>,
    pub deepen_not: Vec<String>,
    pub filter: Option<String>,
}

impl FetchArgs {
    /// Parses the argument lines of a `fetch` request.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        for arg in args {
            match arg.as_str() {
                "done" => parsed.done = true,
                "thin-pack" => parsed.thin_pack = true,
                "no-progress" => parsed.no_progress = true,
                "include-tag" => parsed.include_tag = true,
                "ofs-delta" => parsed.ofs_delta = true,
                "sideband-all" => parsed.sideband_all = true,
                "deepen-relative" => parsed.deepen_relative = true,
                other => {
                    if let Some(oid) = other.strip_prefix("want ") {
                        parsed.wants.push(Oid::from_hex(oid.trim())?);
                    } else if let Some(oid) = other.strip_prefix("have ") {
                        parsed.haves.push(Oid::from_hex(oid.trim())?);
                    } else if let Some(oid) = other.strip_prefix("shallow ") {
                        parsed.shallow.push(Oid::from_hex(oid.trim())?);
                    } else if let Some(n) = other.strip_prefix("deepen ") {
                        parsed.deepen = n.trim().parse().ok();
                    } else if let Some(t) = other.strip_prefix("deepen-since ") {
                        parsed.deepen_since = t.trim().parse().ok();
                    } else if let Some(r) = other.strip_prefix("deepen-not ") {
                        parsed.deepen_not.push(r.trim().to_string());
                    } else if let Some(spec) = other.strip_prefix("filter ") {
                        // Parsed but not honored; a full pack is returned.
                        parsed.filter = Some(spec.trim().to_string());
                    }
                }
            }
        }
        Ok(parsed)
    }
}

fn fetch(repo: &Repository, raw_args: &[String]) -> Result<Vec<u8>> {
    let args = FetchArgs::parse(raw_args)?;
    if let Some(filter) = &args.filter {
        tracing::debug!(filter = %filter, "ignoring unsupported fetch filter");
    }

    let mut out = PktWriter::new();

    if !args.done {
        // Negotiation round: acknowledgments only, no packfile section.
        let common = repo.find_common_commits(&args.haves);
        out.line("acknowledgments")?;
        if common.is_empty() {
            out.line("NAK")?;
        } else {
            for oid in &common {
                out.line(&format!("ACK {}", oid))?;
            }
        }
        out.line("ready")?;
        out.delim();
        out.flush();
        return Ok(out.into_bytes());
    }

    if args.wants.is_empty() {
        out.flush();
        return Ok(out.into_bytes());
    }

    let oids = match repo.collect_objects_for_pack(&args.wants, &args.haves) {
        Ok(oids) => oids,
        Err(e @ GitError::ObjectNotFound(_)) => {
            // An unreadable want aborts the fetch with a side-band error.
            out.line("packfile")?;
            out.band(BAND_ERROR, format!("fetch failed: {}\n", e).as_bytes())?;
            out.flush();
            return Ok(out.into_bytes());
        }
        Err(e) => return Err(e.into()),
    };
    let pack_bytes = repo.pack_objects(&oids)?;
    // The advertised count comes from the emitted header, not the walk.
    let count = pack::object_count(&pack_bytes).unwrap_or(0);

    out.line("packfile")?;
    if !args.no_progress {
        out.band(
            BAND_PROGRESS,
            format!("remote: Counting objects: {}, done.\r\n", count).as_bytes(),
        )?;
        out.band(
            BAND_PROGRESS,
            format!(
                "remote: Compressing objects: 100% ({}/{}), done.\r\n",
                count, count
            )
            .as_bytes(),
        )?;
    }
    out.band_stream(BAND_DATA, &pack_bytes)?;
    if !args.no_progress {
        out.band(
            BAND_PROGRESS,
            format!(
                "remote: Total {} (delta 0), reused {} (delta 0), pack-reused 0\r\n",
                count, count
            )
            .as_bytes(),
        )?;
    }
    out.flush();
    Ok(out.into_bytes())
}

/// Assembles the request body a v2 client would send; used by the test
/// suites to drive the engine the way a real client does.
pub fn build_request(command: &str, caps: &[&str], args: &[String]) -> Result<Vec<u8>> {
    let mut out = PktWriter::new();
    out.line(&format!("command={}", command))?;
    out.line(&format!("agent={}", AGENT))?;
    for cap in caps {
        out.line(cap)?;
    }
    out.delim();
    for arg in args {
        out.line(arg)?;
    }
    out.flush();
    Ok(out.into_bytes())
}

/// Splits an upload-pack response into its pkt-line section lines, the
/// reassembled side-band data channel, and the progress/error messages.
/// Stops at the first framing error.
pub fn split_response(body: &[u8]) -> (Vec<String>, Vec<u8>, Vec<String>) {
    let mut reader = PktReader::new(body);
    let mut sections = Vec::new();
    let mut pack_data = Vec::new();
    let mut progress = Vec::new();
    while let Ok(Some(pkt)) = reader.next() {
        match pkt {
            Packet::Data(d) => {
                match d.first() {
                    Some(&pktline::BAND_DATA) => pack_data.extend_from_slice(&d[1..]),
                    Some(&pktline::BAND_PROGRESS) => {
                        progress.push(String::from_utf8_lossy(&d[1..]).to_string())
                    }
                    Some(&pktline::BAND_ERROR) => {
                        progress.push(format!("ERR:{}", String::from_utf8_lossy(&d[1..])))
                    }
                    _ => sections.push(String::from_utf8_lossy(&d).to_string()),
                }
            }
            Packet::Error(e) => sections.push(format!("ERR {}", e)),
            Packet::Flush => sections.push("FLUSH".to_string()),
            Packet::Delim => sections.push("DELIM".to_string()),
            Packet::ResponseEnd => sections.push("END".to_string()),
        }
    }
    (sections, pack_data, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_git::{GitObject, TreeEntry};
    use barge_store::MemoryStore;
    use std::sync::Arc;

    fn test_repo() -> Repository {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        repo.init().unwrap();
        repo
    }

    fn seed(repo: &Repository) -> (Oid, Oid, Oid) {
        let blob = GitObject::blob(b"content\n".to_vec());
        let tree = GitObject::tree(vec![TreeEntry::file("file.txt", blob.id)]);
        let commit = GitObject::commit(
            &tree.id,
            &[],
            "A <a@example.com> 1700000000 +0000",
            "A <a@example.com> 1700000000 +0000",
            "first\n",
        );
        for obj in [&blob, &tree, &commit] {
            repo.write_object(obj).unwrap();
        }
        repo.write_ref("refs/heads/main", &commit.id).unwrap();
        (commit.id, tree.id, blob.id)
    }

    #[test]
    fn ls_refs_on_empty_repo_is_just_flush() {
        let repo = test_repo();
        let body = build_request("ls-refs", &[], &[]).unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        assert_eq!(response, b"0000");
    }

    #[test]
    fn ls_refs_lists_head_and_branches() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);

        let body = build_request("ls-refs", &[], &[]).unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, _) = split_response(&response);
        assert_eq!(sections[0], format!("{} HEAD\n", commit));
        assert_eq!(sections[1], format!("{} refs/heads/main\n", commit));
        assert_eq!(sections[2], "FLUSH");
    }

    #[test]
    fn ls_refs_symrefs_and_prefix() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);
        repo.write_ref("refs/tags/v1", &commit).unwrap();

        let body = build_request(
            "ls-refs",
            &[],
            &[
                "symrefs".to_string(),
                "ref-prefix refs/heads/".to_string(),
            ],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, _) = split_response(&response);
        assert_eq!(
            sections[0],
            format!("{} HEAD symref-target:refs/heads/main\n", commit)
        );
        assert_eq!(sections[1], format!("{} refs/heads/main\n", commit));
        // refs/tags/v1 filtered out by the prefixes.
        assert_eq!(sections[2], "FLUSH");
    }

    #[test]
    fn ls_refs_peels_annotated_tags() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);
        let tag = GitObject::new(
            ObjectKind::Tag,
            format!(
                "object {}\ntype commit\ntag v1.0\ntagger T <t@e.x> 1700000000 +0000\n\nrelease\n",
                commit
            )
            .into_bytes(),
        );
        repo.write_object(&tag).unwrap();
        repo.write_ref("refs/tags/v1.0", &tag.id).unwrap();

        let body = build_request("ls-refs", &[], &["peel".to_string()]).unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, _) = split_response(&response);
        let tag_line = format!("{} refs/tags/v1.0\n", tag.id);
        let peel_line = format!("{} refs/tags/v1.0^{{}}\n", commit);
        assert!(sections.contains(&tag_line));
        assert!(sections.contains(&peel_line));
    }

    #[test]
    fn unknown_command_answers_with_err_packet() {
        let repo = test_repo();
        let body = build_request("archive", &[], &[]).unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, _) = split_response(&response);
        assert_eq!(sections[0], "ERR unknown command archive");
    }

    #[test]
    fn fetch_negotiation_acks_common_commits() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);
        let ghost = Oid::from_bytes([0xdd; 20]);

        let body = build_request(
            "fetch",
            &[],
            &[
                format!("want {}", commit),
                format!("have {}", commit),
                format!("have {}", ghost),
            ],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, _) = split_response(&response);
        assert_eq!(sections[0], "acknowledgments\n");
        assert_eq!(sections[1], format!("ACK {}\n", commit));
        assert_eq!(sections[2], "ready\n");
        assert_eq!(sections[3], "DELIM");
        assert_eq!(sections[4], "FLUSH");
    }

    #[test]
    fn fetch_negotiation_naks_without_common() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);
        let ghost = Oid::from_bytes([0xdd; 20]);

        let body = build_request(
            "fetch",
            &[],
            &[format!("want {}", commit), format!("have {}", ghost)],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, _) = split_response(&response);
        assert_eq!(sections[0], "acknowledgments\n");
        assert_eq!(sections[1], "NAK\n");
        assert_eq!(sections[2], "ready\n");
    }

    #[test]
    fn fetch_with_done_streams_pack_with_count() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);

        let body = build_request(
            "fetch",
            &[],
            &[format!("want {}", commit), "done".to_string()],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, pack_data, progress) = split_response(&response);
        assert_eq!(sections[0], "packfile\n");
        assert_eq!(pack::object_count(&pack_data), Some(3));
        assert!(progress
            .iter()
            .any(|p| p.contains("Counting objects: 3, done.")));
        assert!(progress
            .iter()
            .any(|p| p.contains("Total 3 (delta 0), reused 3 (delta 0), pack-reused 0")));
    }

    #[test]
    fn fetch_no_progress_suppresses_channel_two() {
        let repo = test_repo();
        let (commit, _, _) = seed(&repo);

        let body = build_request(
            "fetch",
            &[],
            &[
                format!("want {}", commit),
                "no-progress".to_string(),
                "done".to_string(),
            ],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (_, pack_data, progress) = split_response(&response);
        assert!(progress.is_empty());
        assert_eq!(pack::object_count(&pack_data), Some(3));
    }

    #[test]
    fn fetch_excludes_haves_from_pack() {
        let repo = test_repo();
        let (first, _, _) = seed(&repo);
        let blob = GitObject::blob(b"second\n".to_vec());
        let tree = GitObject::tree(vec![TreeEntry::file("file.txt", blob.id)]);
        let second = GitObject::commit(
            &tree.id,
            &[first],
            "A <a@example.com> 1700000100 +0000",
            "A <a@example.com> 1700000100 +0000",
            "second\n",
        );
        for obj in [&blob, &tree, &second] {
            repo.write_object(obj).unwrap();
        }

        let body = build_request(
            "fetch",
            &[],
            &[
                format!("want {}", second.id),
                format!("have {}", first),
                "done".to_string(),
            ],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (_, pack_data, _) = split_response(&response);
        // second commit + its tree + its blob
        assert_eq!(pack::object_count(&pack_data), Some(3));
    }

    #[test]
    fn fetch_missing_want_reports_sideband_error() {
        let repo = test_repo();
        seed(&repo);
        let ghost = Oid::from_bytes([0xee; 20]);

        let body = build_request(
            "fetch",
            &[],
            &[format!("want {}", ghost), "done".to_string()],
        )
        .unwrap();
        let response = upload_pack(&repo, &body).unwrap();
        let (sections, _, progress) = split_response(&response);
        assert_eq!(sections[0], "packfile\n");
        assert!(progress.iter().any(|p| p.starts_with("ERR:fetch failed:")));
    }

    #[test]
    fn fetch_parses_shallow_and_filter_args_without_honoring() {
        let args = FetchArgs::parse(&[
            "want 0000000000000000000000000000000000000001".to_string(),
            "shallow 0000000000000000000000000000000000000002".to_string(),
            "deepen 3".to_string(),
            "deepen-relative".to_string(),
            "deepen-since 1700000000".to_string(),
            "deepen-not refs/heads/old".to_string(),
            "filter blob:none".to_string(),
            "thin-pack".to_string(),
            "ofs-delta".to_string(),
            "include-tag".to_string(),
            "sideband-all".to_string(),
        ])
        .unwrap();
        assert_eq!(args.wants.len(), 1);
        assert_eq!(args.shallow.len(), 1);
        assert_eq!(args.deepen, Some(3));
        assert!(args.deepen_relative);
        assert_eq!(args.deepen_since, Some(1700000000));
        assert_eq!(args.deepen_not, vec!["refs/heads/old"]);
        assert_eq!(args.filter.as_deref(), Some("blob:none"));
        assert!(args.thin_pack && args.ofs_delta && args.include_tag && args.sideband_all);
    }
}
