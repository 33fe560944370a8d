//! Capability advertisement for `GET info/refs`.

use crate::{ProtocolError, Result, AGENT};
use barge_git::pktline::PktWriter;
use barge_git::{Oid, Repository};

/// The two smart HTTP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Fetch/clone side (`git-upload-pack`), spoken as protocol v2.
    UploadPack,
    /// Push side (`git-receive-pack`), spoken as protocol v0/v1.
    ReceivePack,
}

impl Service {
    /// Parses the `service` query parameter.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(ProtocolError::UnknownService(other.to_string())),
        }
    }

    /// The wire name of the service.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content-Type of the advertisement response.
    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.name())
    }

    /// Content-Type of the POST result response.
    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.name())
    }
}

/// Builds the advertisement body for `GET info/refs?service=…`.
pub fn advertise(repo: &Repository, service: Service) -> Result<Vec<u8>> {
    match service {
        Service::UploadPack => advertise_upload_pack(),
        Service::ReceivePack => advertise_receive_pack(repo),
    }
}

/// Protocol v2 capability listing; refs come later via `ls-refs`.
fn advertise_upload_pack() -> Result<Vec<u8>> {
    let mut out = PktWriter::new();
    out.line("version 2")?;
    out.line(&format!("agent={}", AGENT))?;
    out.line("ls-refs")?;
    out.line("fetch")?;
    out.line("side-band-64k")?;
    out.line("object-format=sha1")?;
    out.flush();
    Ok(out.into_bytes())
}

/// Protocol v0/v1 advertisement: service preamble, then each ref with the
/// capability list attached to the first line.
fn advertise_receive_pack(repo: &Repository) -> Result<Vec<u8>> {
    let listing = repo.list_refs()?;

    let mut caps = format!("report-status delete-refs atomic no-thin agent={}", AGENT);
    if let Some(target) = &listing.symbolic_head {
        caps.push_str(&format!(" symref=HEAD:{}", target));
    }

    let mut out = PktWriter::new();
    out.line(&format!("# service={}", Service::ReceivePack.name()))?;
    out.flush();

    if listing.refs.is_empty() {
        // Empty repository: synthetic line so capabilities still travel.
        out.line(&format!("{} capabilities^{{}}\0{}", Oid::ZERO, caps))?;
    } else {
        for (index, (name, oid)) in listing.refs.iter().enumerate() {
            if index == 0 {
                out.line(&format!("{} {}\0{}", oid, name, caps))?;
            } else {
                out.line(&format!("{} {}", oid, name))?;
            }
        }
    }
    out.flush();
    Ok(out.into_bytes())
}
