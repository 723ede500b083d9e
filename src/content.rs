//! Content link graph
//!
//! A content item enters a group through a `Content` link from the author's
//! active anchor to its first address, which becomes its `content_id`. Each
//! later version is a `ContentUpdate` link to the new address, tagged with the
//! `content_id` and the version it follows.
//!
//! Resolution reads the content links of every anchor that counts for the
//! group's current head (active anchors of current authorities, archive
//! anchors of removed ones) in one store read, then walks the resulting edge
//! index in memory:
//!
//! ```text
//! C1 ──(t1)──▶ C1a ──(t3)──▶ C1b
//!   └─(t2)──▶ C1x
//! ```
//!
//! From each cursor the newest edge wins, ordered by `(timestamp, seq)`, so
//! the walk above ends at `C1b` no matter which anchor reported which edge.
//! Only edges newer than the one just taken are followed. A revert
//! (`v2 ──▶ v1` after `v1 ──▶ v2`) therefore lands on `v1`, and every walk
//! ends because ticks only grow along it.

use crate::anchor::group_auth_anchor_hash;
use crate::api::CoopContent;
use crate::entry::{AppEntry, ContentUpdateTag, GroupAuthAnchorEntry, Link, LinkType, Record, Tick};
use crate::error::{CoopError, CoopResult};
use crate::hash::Address;
use crate::store::{Store, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Input for `create_content_link`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContentLinkInput {
    pub group_id: Address,
    pub content_target: Address,
}

/// Input for `create_content_update_link`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContentUpdateLinkInput {
    pub group_id: Address,
    pub content_id: Address,
    pub content_prev: Address,
    pub content_next: Address,
}

/// Input for the per-item content reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGroupContentInput {
    pub group_id: Address,
    pub content_id: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    tick: Tick,
    next: Address,
}

/// Update edges of a group, keyed by content item then by source version
#[derive(Debug, Default)]
pub struct EdgeIndex {
    edges: HashMap<Address, HashMap<Address, Vec<Edge>>>,
}

impl EdgeIndex {
    /// Build from `ContentUpdate` links; links with unreadable tags are skipped
    pub fn from_links<'a>(links: impl IntoIterator<Item = &'a Link>) -> Self {
        let mut index = Self::default();
        for link in links {
            match ContentUpdateTag::decode(&link.tag) {
                Ok(tag) => index.insert(tag.content_id, tag.content_prev, link.target.clone(), link.tick),
                Err(e) => warn!(link = %link.create_action, error = %e, "Skipping update link with unreadable tag"),
            }
        }
        index
    }

    pub fn insert(&mut self, content_id: Address, prev: Address, next: Address, tick: Tick) {
        let edges = self.edges.entry(content_id).or_default().entry(prev).or_default();
        let edge = Edge { tick, next };
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }

    fn newest_from(&self, content_id: &Address, cursor: &Address) -> Option<&Edge> {
        self.edges
            .get(content_id)?
            .get(cursor)?
            .iter()
            .max_by_key(|edge| edge.tick)
    }

    /// Every version from `content_id` to the latest, oldest first
    ///
    /// A version appears more than once if the chain was reverted to it.
    pub fn trace(&self, content_id: &Address) -> Vec<Address> {
        let mut chain = vec![content_id.clone()];
        let mut reached_at: Option<Tick> = None;

        while let Some(edge) = chain.last().and_then(|cursor| self.newest_from(content_id, cursor)) {
            if reached_at.is_some_and(|tick| edge.tick <= tick) {
                break;
            }
            reached_at = Some(edge.tick);
            chain.push(edge.next.clone());
        }

        chain
    }

    /// The version currently considered latest
    pub fn latest(&self, content_id: &Address) -> Address {
        self.trace(content_id)
            .pop()
            .unwrap_or_else(|| content_id.clone())
    }

    /// Number of distinct edges
    pub fn len(&self) -> usize {
        self.edges
            .values()
            .flat_map(|by_prev| by_prev.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One consistent read of a group's content links
struct ContentSnapshot {
    creates: Vec<Link>,
    index: EdgeIndex,
}

impl ContentSnapshot {
    fn knows(&self, content_id: &Address) -> bool {
        self.creates.iter().any(|link| &link.target == content_id)
    }
}

impl<S: Store> CoopContent<S> {
    /// Anchors whose content counts for the group's current head
    fn content_anchors(&self, head: &Record, group_id: &Address) -> CoopResult<Vec<Address>> {
        let mut anchors: Vec<Address> = head
            .group()?
            .authorities()
            .iter()
            .map(|pubkey| group_auth_anchor_hash(group_id, pubkey))
            .collect();
        anchors.extend(
            self.store
                .get_links(head.entry_hash(), LinkType::GroupAuthArchive)?
                .into_iter()
                .map(|link| link.target),
        );
        Ok(anchors)
    }

    fn content_snapshot(&self, group_id: &Address) -> CoopResult<(Address, ContentSnapshot)> {
        let head = self.group_head(group_id)?;
        let group_id = self.root_origin(&head)?.entry_hash().clone();
        let anchors = self.content_anchors(&head, &group_id)?;

        let (creates, updates): (Vec<Link>, Vec<Link>) = self
            .store
            .get_links_many(&anchors, &[LinkType::Content, LinkType::ContentUpdate])?
            .into_iter()
            .partition(|link| link.link_type == LinkType::Content);
        debug!(
            group_id = %group_id,
            anchors = anchors.len(),
            creates = creates.len(),
            updates = updates.len(),
            "Read group content links"
        );

        Ok((
            group_id,
            ContentSnapshot {
                creates,
                index: EdgeIndex::from_links(&updates),
            },
        ))
    }

    /// Resolve the group and check this agent may write to it
    fn writable_group(&self, group_id: &Address) -> CoopResult<Address> {
        let head = self.group_head(group_id)?;
        let group_id = self.root_origin(&head)?.entry_hash().clone();
        if !head.group()?.is_authority(&self.agent) {
            return Err(CoopError::Unauthorized {
                author: self.agent.clone(),
                group_id,
            });
        }
        Ok(group_id)
    }

    /// Link from this agent's anchor
    ///
    /// `Content` links are reused when an identical one exists. `ContentUpdate`
    /// links always append, so re-issuing an older edge makes it the newest.
    fn link_from_anchor(
        &self,
        group_id: &Address,
        target: &Address,
        link_type: LinkType,
        tag: Vec<u8>,
    ) -> CoopResult<Address> {
        let mut batch = WriteBatch::default();
        let anchor = AppEntry::GroupAuthAnchor(GroupAuthAnchorEntry(group_id.clone(), self.agent.clone()));
        let anchor_hash = self.create_if_not_exists(&mut batch, anchor)?;

        if link_type == LinkType::Content {
            if let Some(existing) = self
                .store
                .get_links(&anchor_hash, link_type)?
                .into_iter()
                .find(|link| link.same_edge(target, link_type, &tag))
            {
                debug!(anchor = %anchor_hash, target = %target, "Link already exists");
                return Ok(existing.create_action);
            }
        }

        let link = self.new_link(anchor_hash, target.clone(), link_type, tag)?;
        let action = link.create_action.clone();
        batch.put_link(link);
        self.store.commit(batch)?;
        Ok(action)
    }

    /// Register `content_target` as the first version of a content item
    pub fn create_content_link(&self, input: CreateContentLinkInput) -> CoopResult<Address> {
        debug!(
            group_id = %input.group_id,
            author = %self.agent,
            target = %input.content_target,
            "Creating content link"
        );
        let group_id = self.writable_group(&input.group_id)?;
        self.link_from_anchor(&group_id, &input.content_target, LinkType::Content, vec![])
    }

    /// Record `content_next` as the version following `content_prev`
    pub fn create_content_update_link(&self, input: CreateContentUpdateLinkInput) -> CoopResult<Address> {
        debug!(
            group_id = %input.group_id,
            content_id = %input.content_id,
            prev = %input.content_prev,
            next = %input.content_next,
            "Creating content update link"
        );
        let group_id = self.writable_group(&input.group_id)?;
        let tag = ContentUpdateTag {
            content_id: input.content_id,
            content_prev: input.content_prev,
        }
        .encode()?;
        self.link_from_anchor(&group_id, &input.content_next, LinkType::ContentUpdate, tag)
    }

    /// Latest address of one content item
    pub fn get_group_content_latest(&self, input: GetGroupContentInput) -> CoopResult<Address> {
        let (_, snapshot) = self.content_snapshot(&input.group_id)?;
        if !snapshot.knows(&input.content_id) {
            return Err(CoopError::not_found("Content", &input.content_id));
        }
        let latest = snapshot.index.latest(&input.content_id);
        debug!(content_id = %input.content_id, latest = %latest, "Resolved latest content");
        Ok(latest)
    }

    /// Every version of one content item, oldest first
    pub fn get_group_content_history(&self, input: GetGroupContentInput) -> CoopResult<Vec<Address>> {
        let (_, snapshot) = self.content_snapshot(&input.group_id)?;
        if !snapshot.knows(&input.content_id) {
            return Err(CoopError::not_found("Content", &input.content_id));
        }
        Ok(snapshot.index.trace(&input.content_id))
    }

    /// Latest address of every content item in the group, in creation order
    pub fn get_group_content_targets(&self, group_id: &Address) -> CoopResult<Vec<Address>> {
        let (group_id, snapshot) = self.content_snapshot(group_id)?;
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for link in &snapshot.creates {
            if seen.insert(link.target.clone()) {
                targets.push(snapshot.index.latest(&link.target));
            }
        }
        debug!(group_id = %group_id, count = targets.len(), "Resolved group content targets");
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;

    fn addr(seed: &str) -> Address {
        Address::hash_bytes(HashKind::Entry, seed.as_bytes())
    }

    fn tick(timestamp: i64, seq: u64) -> Tick {
        Tick { timestamp, seq }
    }

    #[test]
    fn test_no_edges_latest_is_self() {
        let index = EdgeIndex::default();
        assert_eq!(index.latest(&addr("c")), addr("c"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_linear_chain() {
        let mut index = EdgeIndex::default();
        index.insert(addr("c"), addr("c"), addr("x"), tick(1, 1));
        index.insert(addr("c"), addr("x"), addr("y"), tick(2, 2));
        assert_eq!(index.latest(&addr("c")), addr("y"));
        assert_eq!(index.trace(&addr("c")), vec![addr("c"), addr("x"), addr("y")]);
    }

    #[test]
    fn test_branch_prefers_newest_edge() {
        let mut index = EdgeIndex::default();
        // Inserted newest first; resolution must not depend on insertion order
        index.insert(addr("c"), addr("c"), addr("b"), tick(5, 9));
        index.insert(addr("c"), addr("c"), addr("a"), tick(5, 3));
        assert_eq!(index.latest(&addr("c")), addr("b"));

        index.insert(addr("c"), addr("c"), addr("later"), tick(6, 1));
        assert_eq!(index.latest(&addr("c")), addr("later"));
    }

    #[test]
    fn test_edges_scoped_by_content_id() {
        let mut index = EdgeIndex::default();
        index.insert(addr("other"), addr("c"), addr("x"), tick(1, 1));
        assert_eq!(index.latest(&addr("c")), addr("c"));
    }

    #[test]
    fn test_revert_lands_on_earlier_version() {
        let mut index = EdgeIndex::default();
        index.insert(addr("c"), addr("c"), addr("x"), tick(1, 1));
        index.insert(addr("c"), addr("x"), addr("c"), tick(2, 2));
        assert_eq!(index.latest(&addr("c")), addr("c"));
        assert_eq!(index.trace(&addr("c")), vec![addr("c"), addr("x"), addr("c")]);
    }

    #[test]
    fn test_revert_then_move_on() {
        let mut index = EdgeIndex::default();
        index.insert(addr("c"), addr("c"), addr("x"), tick(1, 1));
        index.insert(addr("c"), addr("x"), addr("c"), tick(2, 2));
        index.insert(addr("c"), addr("c"), addr("y"), tick(3, 3));
        assert_eq!(index.latest(&addr("c")), addr("y"));
        assert_eq!(
            index.trace(&addr("c")),
            vec![addr("c"), addr("y")]
        );
    }

    #[test]
    fn test_older_edge_after_cursor_is_not_followed() {
        let mut index = EdgeIndex::default();
        index.insert(addr("c"), addr("x"), addr("stale"), tick(1, 1));
        index.insert(addr("c"), addr("c"), addr("x"), tick(2, 2));
        assert_eq!(index.latest(&addr("c")), addr("x"));
    }

    #[test]
    fn test_long_chain_resolves() {
        let mut index = EdgeIndex::default();
        let mut prev = addr("c");
        for i in 0..20_000 {
            let next = addr(&format!("v{}", i));
            index.insert(addr("c"), prev, next.clone(), tick(i, i as u64));
            prev = next;
        }
        assert_eq!(index.latest(&addr("c")), prev);
        assert_eq!(index.trace(&addr("c")).len(), 20_001);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut index = EdgeIndex::default();
        index.insert(addr("c"), addr("c"), addr("x"), tick(1, 1));
        index.insert(addr("c"), addr("c"), addr("x"), tick(1, 1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_from_links_skips_bad_tags() {
        let author = Address::hash_bytes(HashKind::Agent, b"a");
        let anchor = addr("anchor");
        let good_tag = ContentUpdateTag {
            content_id: addr("c"),
            content_prev: addr("c"),
        }
        .encode()
        .unwrap();
        let links = vec![
            Link::new(anchor.clone(), addr("x"), LinkType::ContentUpdate, good_tag, author.clone(), tick(1, 1)).unwrap(),
            Link::new(anchor, addr("y"), LinkType::ContentUpdate, b"garbage".to_vec(), author, tick(2, 2)).unwrap(),
        ];
        let index = EdgeIndex::from_links(&links);
        assert_eq!(index.len(), 1);
        assert_eq!(index.latest(&addr("c")), addr("x"));
    }
}
