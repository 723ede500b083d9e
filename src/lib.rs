//! Coop Content - versioned groups and content links over a hash-linked store
//!
//! Groups are collections of agents with delegated administration. Content
//! items are opaque addresses linked to a group, each with its own chain of
//! versions. Nothing is rewritten in place: every change is a new entry or a
//! new link, and "current" is whatever the chains resolve to.
//!
//! ## Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | `hash` | 39-byte kind-tagged addresses |
//! | `entry` | Entries, actions, records and links |
//! | `store` | Key-value-with-links substrate (memory, sled) |
//! | `group` | Group revisions and authority bookkeeping |
//! | `content` | Content links and latest-version resolution |
//! | `anchor` | Deterministic authorization anchors |
//! | `api` | Agent-bound facade and JSON dispatcher |
//!
//! ## Link Graph
//!
//! ```text
//! agent ──AgentToGroup──▶ group_id ──GroupEvolution──▶ rev2 ──▶ rev3 (head)
//!                                                       │
//!                     ┌──────────GroupAuth──────────────┤
//!                     ▼                                 └──GroupAuthArchive──▶ archive anchor
//!              active anchor ──Content──────▶ C1
//!                            └─ContentUpdate─▶ C1a  (tag: C1, prev C1)
//! ```

pub mod anchor;
pub mod api;
pub mod config;
pub mod content;
pub mod entry;
pub mod error;
pub mod group;
pub mod hash;
pub mod store;

// Re-exports
pub use anchor::{group_auth_anchor_hash, group_auth_archive_anchor_hash};
pub use api::{CoopContent, GroupAuthAnchorInput, UpdateInput};
pub use config::{Backend, Config};
pub use content::{CreateContentLinkInput, CreateContentUpdateLinkInput, EdgeIndex, GetGroupContentInput};
pub use entry::{Link, LinkType, Record, Tick};
pub use error::{CoopError, CoopResult};
pub use group::{CreateGroupInput, GroupEntry};
pub use hash::{Address, HashKind, ADDRESS_LEN};
pub use store::{MemoryStore, SledStore, Store, WriteBatch};
