//! Path layout of a bare repository inside a byte store.

/// The `HEAD` file.
pub const HEAD: &str = "HEAD";

/// The repository config file.
pub const CONFIG: &str = "config";

/// Prefix for branch refs.
pub const HEADS_PREFIX: &str = "refs/heads/";

/// Prefix for tag refs.
pub const TAGS_PREFIX: &str = "refs/tags/";

/// Directory holding packfiles and their indices.
pub const PACK_DIR: &str = "objects/pack/";

/// Path of a loose object for a 40-char hex OID.
pub fn loose_object(hex: &str) -> String {
    format!("objects/{}/{}", &hex[..2], &hex[2..])
}

/// Path of a packfile with the given name stem (`pack-<nonce>`).
pub fn pack_file(stem: &str) -> String {
    format!("{}{}.pack", PACK_DIR, stem)
}

/// Path of a pack index with the given name stem.
pub fn pack_index(stem: &str) -> String {
    format!("{}{}.idx", PACK_DIR, stem)
}

/// Staging path for an inbound pack that has not been indexed yet.
pub fn pack_staging(stem: &str) -> String {
    format!("{}{}.pack.tmp", PACK_DIR, stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_object_fans_out_on_first_byte() {
        let path = loose_object("ce013625030ba8dba906f756967f9e9ca394464a");
        assert_eq!(path, "objects/ce/013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn pack_paths_share_a_stem() {
        assert_eq!(pack_file("pack-1"), "objects/pack/pack-1.pack");
        assert_eq!(pack_index("pack-1"), "objects/pack/pack-1.idx");
        assert_eq!(pack_staging("pack-1"), "objects/pack/pack-1.pack.tmp");
    }
}
