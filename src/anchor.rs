//! Authorization anchors
//!
//! An anchor is the address external policy looks up to decide whether an
//! agent may act on a group's content. Both flavors are pure functions of
//! `(group_id, author)`:
//!
//! ```text
//! active:  SHA-256("coop_content::GroupAuthAnchor"        0x00 group_id author)
//! archive: SHA-256("coop_content::GroupAuthArchiveAnchor" 0x00 group_id author)
//! ```
//!
//! `group_id` and `author` are their full 39-byte forms. The result is an
//! Entry address, equal to the hash of the matching anchor entry, so the
//! anchors can be materialized in the store and found again by the same key.

use crate::entry::{GroupAuthAnchorEntry, GroupAuthArchiveAnchorEntry};
use crate::hash::{Address, HashKind};
use sha2::{Digest, Sha256};

const ACTIVE_DOMAIN: &[u8] = b"coop_content::GroupAuthAnchor";
const ARCHIVE_DOMAIN: &[u8] = b"coop_content::GroupAuthArchiveAnchor";

fn derive(domain: &[u8], group_id: &Address, author: &Address) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update([0u8]);
    hasher.update(group_id.as_bytes());
    hasher.update(author.as_bytes());
    Address::from_digest(HashKind::Entry, hasher.finalize().into())
}

/// Anchor for "author is an active authority of group_id"
pub fn group_auth_anchor_hash(group_id: &Address, author: &Address) -> Address {
    derive(ACTIVE_DOMAIN, group_id, author)
}

/// Anchor for "author's authority over group_id has been archived"
pub fn group_auth_archive_anchor_hash(group_id: &Address, author: &Address) -> Address {
    derive(ARCHIVE_DOMAIN, group_id, author)
}

impl GroupAuthAnchorEntry {
    pub fn hash(&self) -> Address {
        group_auth_anchor_hash(&self.0, &self.1)
    }
}

impl GroupAuthArchiveAnchorEntry {
    pub fn hash(&self) -> Address {
        group_auth_archive_anchor_hash(&self.0, &self.1)
    }
}
