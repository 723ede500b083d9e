//! Entry, action and link records
//!
//! Everything persisted by the store is one of three things:
//!
//! - an app entry (group revisions and anchors), hashed into an Entry address
//! - the action that wrote it, hashed into an Action address
//! - a link between two addresses
//!
//! Actions, links and group entries hash as SHA-256 over their MessagePack
//! encoding. The entry enum is externally tagged, so the variant name is part
//! of the hashed bytes. Anchor entries hash through the fixed derivation in
//! [`crate::anchor`] so callers can compute them without a serializer.

use crate::error::{CoopError, CoopResult};
use crate::group::GroupEntry;
use crate::hash::{Address, HashKind};
use serde::{Deserialize, Serialize};

/// Logical write position issued by the store clock
///
/// Ordered by timestamp first, then by sequence. The sequence is unique per
/// store, so no two writes compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick {
    /// Microseconds since the Unix epoch, strictly increasing
    pub timestamp: i64,
    /// Store-wide write counter
    pub seq: u64,
}

/// Active authority anchor: `(group_id, author)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAuthAnchorEntry(pub Address, pub Address);

/// Archived authority anchor: `(group_id, author)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAuthArchiveAnchorEntry(pub Address, pub Address);

/// Every entry type this layer writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEntry {
    Group(GroupEntry),
    GroupAuthAnchor(GroupAuthAnchorEntry),
    GroupAuthArchiveAnchor(GroupAuthArchiveAnchorEntry),
}

impl AppEntry {
    /// Canonical bytes used for hashing and persistence
    pub fn encode(&self) -> CoopResult<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CoopResult<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Entry address; anchors use their fixed derivation in [`crate::anchor`]
    pub fn hash(&self) -> CoopResult<Address> {
        match self {
            AppEntry::Group(_) => Ok(Address::hash_bytes(HashKind::Entry, &self.encode()?)),
            AppEntry::GroupAuthAnchor(anchor) => Ok(anchor.hash()),
            AppEntry::GroupAuthArchiveAnchor(anchor) => Ok(anchor.hash()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AppEntry::Group(_) => "Group",
            AppEntry::GroupAuthAnchor(_) => "GroupAuthAnchor",
            AppEntry::GroupAuthArchiveAnchor(_) => "GroupAuthArchiveAnchor",
        }
    }

    pub fn into_group(self) -> Option<GroupEntry> {
        match self {
            AppEntry::Group(group) => Some(group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Create,
    Update { original_entry: Address },
}

/// The write that produced an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub author: Address,
    pub tick: Tick,
    pub entry_hash: Address,
}

impl Action {
    pub fn hash(&self) -> CoopResult<Address> {
        Ok(Address::hash_bytes(
            HashKind::Action,
            &rmp_serde::to_vec(self)?,
        ))
    }
}

/// An action together with the entry it wrote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub action_hash: Address,
    pub action: Action,
    pub entry: AppEntry,
}

impl Record {
    /// Build a record, computing both hashes
    pub fn new(kind: ActionKind, author: Address, tick: Tick, entry: AppEntry) -> CoopResult<Self> {
        let entry_hash = entry.hash()?;
        let action = Action {
            kind,
            author,
            tick,
            entry_hash,
        };
        Ok(Self {
            action_hash: action.hash()?,
            action,
            entry,
        })
    }

    pub fn entry_hash(&self) -> &Address {
        &self.action.entry_hash
    }

    /// The entry this record revises, if it is an update
    pub fn original_entry(&self) -> Option<&Address> {
        match &self.action.kind {
            ActionKind::Update { original_entry } => Some(original_entry),
            ActionKind::Create => None,
        }
    }

    pub fn group(&self) -> CoopResult<&GroupEntry> {
        match &self.entry {
            AppEntry::Group(group) => Ok(group),
            other => Err(CoopError::Validation(format!(
                "entry {} is a {}, not a Group",
                self.entry_hash(),
                other.type_name()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    /// agent → group_id, written on create
    AgentToGroup,
    /// group revision → next group revision
    GroupEvolution,
    /// group revision → active anchor of an authority
    GroupAuth,
    /// group revision → archive anchor of a removed authority
    GroupAuthArchive,
    /// anchor → first version of a content item
    Content,
    /// anchor → next version of a content item (tag carries id and prev)
    ContentUpdate,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::AgentToGroup => "agent_to_group",
            LinkType::GroupEvolution => "group_evolution",
            LinkType::GroupAuth => "group_auth",
            LinkType::GroupAuthArchive => "group_auth_archive",
            LinkType::Content => "content",
            LinkType::ContentUpdate => "content_update",
        }
    }
}

/// A directed, typed edge between two addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub base: Address,
    pub target: Address,
    pub link_type: LinkType,
    pub tag: Vec<u8>,
    pub author: Address,
    pub tick: Tick,
    pub create_action: Address,
}

#[derive(Serialize)]
struct CreateLinkAction<'a> {
    base: &'a Address,
    target: &'a Address,
    link_type: LinkType,
    tag: &'a [u8],
    author: &'a Address,
    tick: Tick,
}

impl Link {
    pub fn new(
        base: Address,
        target: Address,
        link_type: LinkType,
        tag: Vec<u8>,
        author: Address,
        tick: Tick,
    ) -> CoopResult<Self> {
        let create_action = Address::hash_bytes(
            HashKind::Action,
            &rmp_serde::to_vec(&CreateLinkAction {
                base: &base,
                target: &target,
                link_type,
                tag: &tag,
                author: &author,
                tick,
            })?,
        );
        Ok(Self {
            base,
            target,
            link_type,
            tag,
            author,
            tick,
            create_action,
        })
    }

    /// Same edge regardless of who wrote it or when
    pub fn same_edge(&self, target: &Address, link_type: LinkType, tag: &[u8]) -> bool {
        &self.target == target && self.link_type == link_type && self.tag == tag
    }
}

/// Tag carried by a content update link: which item, and which version it follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdateTag {
    pub content_id: Address,
    pub content_prev: Address,
}

impl ContentUpdateTag {
    pub fn encode(&self) -> CoopResult<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(tag: &[u8]) -> CoopResult<Self> {
        Ok(rmp_serde::from_slice(tag)?)
    }
}
