//! Group record store
//!
//! A group is identified by the entry address of its creation. Every update
//! writes a new revision and a `GroupEvolution` link from the revision it
//! replaced; reads follow those links to the head.
//!
//! Authorities (admins and members) each get an active anchor linked from the
//! revision that lists them. When an update removes an authority, their
//! content links are copied onto an archive anchor so the content they wrote
//! stays resolvable after they lose write access.

use crate::anchor::{group_auth_anchor_hash, group_auth_archive_anchor_hash};
use crate::api::CoopContent;
use crate::entry::{
    ActionKind, AppEntry, GroupAuthAnchorEntry, GroupAuthArchiveAnchorEntry, Link, LinkType,
    Record,
};
use crate::error::{CoopError, CoopResult};
use crate::hash::{Address, HashKind};
use crate::store::{Store, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Group entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub admins: Vec<Address>,
    #[serde(default)]
    pub members: Vec<Address>,
    #[serde(default)]
    pub deleted: Option<bool>,
    /// Set from the store clock on create, carried through updates
    #[serde(default)]
    pub published_at: i64,
    /// Set from the store clock on every write
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GroupEntry {
    /// Admins then members, deduplicated, in listed order
    pub fn authorities(&self) -> Vec<Address> {
        let mut seen = HashSet::new();
        self.admins
            .iter()
            .chain(self.members.iter())
            .filter(|pubkey| seen.insert(*pubkey))
            .cloned()
            .collect()
    }

    pub fn is_admin(&self, agent: &Address) -> bool {
        self.admins.contains(agent)
    }

    pub fn is_authority(&self, agent: &Address) -> bool {
        self.is_admin(agent) || self.members.contains(agent)
    }

    /// Compare authorities with a newer revision
    pub fn authorities_diff(&self, next: &GroupEntry) -> AuthoritiesDiff {
        let before = self.authorities();
        let after = next.authorities();
        AuthoritiesDiff {
            added: after.iter().filter(|a| !before.contains(a)).cloned().collect(),
            removed: before.iter().filter(|a| !after.contains(a)).cloned().collect(),
            intersection: after.iter().filter(|a| before.contains(a)).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthoritiesDiff {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
    pub intersection: Vec<Address>,
}

/// Input for `create_group`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupInput {
    pub members: Vec<Address>,
    pub admin: Address,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn validate_agents(field: &str, agents: &[Address]) -> CoopResult<()> {
    let mut seen = HashSet::new();
    for agent in agents {
        if !agent.is_kind(HashKind::Agent) {
            return Err(CoopError::Validation(format!(
                "{} must be agent addresses; {} is a {} address",
                field,
                agent,
                agent.kind()
            )));
        }
        if !seen.insert(agent) {
            return Err(CoopError::Validation(format!(
                "{} lists {} more than once",
                field, agent
            )));
        }
    }
    Ok(())
}

/// Structural checks shared by create and update
pub fn validate_group(group: &GroupEntry) -> CoopResult<()> {
    if group.admins.is_empty() {
        return Err(CoopError::Validation(
            "a group needs at least one admin".to_string(),
        ));
    }
    validate_agents("admins", &group.admins)?;
    validate_agents("members", &group.members)
}

impl<S: Store> CoopContent<S> {
    /// Write an entry unless the store or the batch already has it
    pub(crate) fn create_if_not_exists(&self, batch: &mut WriteBatch, entry: AppEntry) -> CoopResult<Address> {
        let entry_hash = entry.hash()?;
        if !batch.has_entry(&entry_hash) && !self.store.entry_exists(&entry_hash)? {
            let record = Record::new(ActionKind::Create, self.agent.clone(), self.store.tick()?, entry)?;
            batch.put_record(record);
        }
        Ok(entry_hash)
    }

    pub(crate) fn new_link(&self, base: Address, target: Address, link_type: LinkType, tag: Vec<u8>) -> CoopResult<Link> {
        Link::new(base, target, link_type, tag, self.agent.clone(), self.store.tick()?)
    }

    /// Create a group; returns its id (the entry address of the creation)
    pub fn create_group(&self, input: CreateGroupInput) -> CoopResult<Address> {
        validate_agents("admin", std::slice::from_ref(&input.admin))?;
        validate_agents("members", &input.members)?;

        let tick = self.store.tick()?;
        let group = GroupEntry {
            admins: vec![input.admin],
            members: input.members,
            deleted: None,
            published_at: tick.timestamp,
            last_updated: tick.timestamp,
            metadata: input.metadata,
        };
        validate_group(&group)?;
        debug!(admins = group.admins.len(), members = group.members.len(), "Creating new group entry");

        let record = Record::new(ActionKind::Create, self.agent.clone(), tick, AppEntry::Group(group.clone()))?;
        let group_id = record.entry_hash().clone();

        let mut batch = WriteBatch::default();
        batch.put_record(record);

        for pubkey in group.authorities() {
            let anchor = AppEntry::GroupAuthAnchor(GroupAuthAnchorEntry(group_id.clone(), pubkey));
            let anchor_hash = self.create_if_not_exists(&mut batch, anchor)?;
            debug!(anchor = %anchor_hash, "Linking group auth anchor");
            batch.put_link(self.new_link(group_id.clone(), anchor_hash, LinkType::GroupAuth, vec![])?);
        }

        batch.put_link(self.new_link(self.agent.clone(), group_id.clone(), LinkType::AgentToGroup, vec![])?);
        self.store.commit(batch)?;

        info!(group_id = %group_id, "Created group");
        Ok(group_id)
    }

    /// Record for a group revision, by entry or action address
    pub(crate) fn group_record(&self, address: &Address) -> CoopResult<Record> {
        match self.store.get_record(address)? {
            Some(record) if matches!(record.entry, AppEntry::Group(_)) => Ok(record),
            _ => Err(CoopError::not_found("Group", address)),
        }
    }

    /// Walk `original_entry` back to the creation record
    pub(crate) fn root_origin(&self, record: &Record) -> CoopResult<Record> {
        let mut current = record.clone();
        let mut visited = HashSet::from([current.entry_hash().clone()]);
        while let Some(original) = current.original_entry().cloned() {
            if !visited.insert(original.clone()) {
                return Err(CoopError::Validation(format!(
                    "group revision {} revises itself through {}",
                    record.entry_hash(),
                    original
                )));
            }
            current = self.group_record(&original)?;
        }
        Ok(current)
    }

    /// Revisions from `group_id` to the current head, oldest first
    pub(crate) fn group_chain(&self, group_id: &Address) -> CoopResult<Vec<Record>> {
        let first = self.group_record(group_id)?;
        let mut cursor = first.entry_hash().clone();
        let mut visited = HashSet::from([cursor.clone()]);
        let mut chain = vec![first];

        while let Some(link) = self
            .store
            .get_links(&cursor, LinkType::GroupEvolution)?
            .into_iter()
            .max_by_key(|link| link.tick)
        {
            if !visited.insert(link.target.clone()) {
                warn!(group_id = %group_id, revision = %link.target, "Group evolution loops back; stopping");
                break;
            }
            let record = self.group_record(&link.target)?;
            cursor = record.entry_hash().clone();
            chain.push(record);
        }

        Ok(chain)
    }

    /// Current head record of a group
    pub(crate) fn group_head(&self, group_id: &Address) -> CoopResult<Record> {
        self.group_chain(group_id)?
            .pop()
            .ok_or_else(|| CoopError::not_found("Group", group_id))
    }

    /// Entry address of the group's current head
    pub fn get_group_head(&self, group_id: &Address) -> CoopResult<Address> {
        Ok(self.group_head(group_id)?.entry_hash().clone())
    }

    /// Entry addresses of every revision, oldest first
    pub fn get_group_history(&self, group_id: &Address) -> CoopResult<Vec<Address>> {
        Ok(self
            .group_chain(group_id)?
            .iter()
            .map(|r| r.entry_hash().clone())
            .collect())
    }

    /// Latest revision of a group
    pub fn get_group(&self, group_id: &Address) -> CoopResult<GroupEntry> {
        debug!(group_id = %group_id, "Get latest group entry");
        let head = self.group_head(group_id)?;
        Ok(head.group()?.clone())
    }

    /// Append a revision; `base` must be the current head
    pub fn update_group(&self, base: &Address, entry: GroupEntry) -> CoopResult<Address> {
        debug!(base = %base, "Update group action");
        let base_record = self.group_record(base)?;
        let base_entry = base_record.entry_hash().clone();
        let prev_group = base_record.group()?.clone();
        let group_id = self.root_origin(&base_record)?.entry_hash().clone();

        let head = self.group_head(&group_id)?;
        if head.entry_hash() != &base_entry {
            return Err(CoopError::Conflict {
                base: base.clone(),
                head: head.entry_hash().clone(),
            });
        }

        if !prev_group.is_admin(&self.agent) {
            return Err(CoopError::Unauthorized {
                author: self.agent.clone(),
                group_id,
            });
        }
        if entry.admins != prev_group.admins {
            return Err(CoopError::Validation(
                "Changing a group's admin list requires counter-signing".to_string(),
            ));
        }
        validate_group(&entry)?;

        let tick = self.store.tick()?;
        let group = GroupEntry {
            published_at: prev_group.published_at,
            last_updated: tick.timestamp,
            ..entry
        };
        let diff = prev_group.authorities_diff(&group);

        let record = Record::new(
            ActionKind::Update {
                original_entry: base_entry.clone(),
            },
            self.agent.clone(),
            tick,
            AppEntry::Group(group),
        )?;
        let new_head = record.entry_hash().clone();

        let mut batch = WriteBatch::default();
        batch.require_no_links(base_entry.clone(), LinkType::GroupEvolution);
        batch.put_record(record);
        batch.put_link(self.new_link(base_entry.clone(), new_head.clone(), LinkType::GroupEvolution, vec![])?);

        for link in self.store.get_links(&base_entry, LinkType::GroupAuthArchive)? {
            batch.put_link(self.new_link(new_head.clone(), link.target, LinkType::GroupAuthArchive, link.tag)?);
        }

        for pubkey in &diff.removed {
            debug!(agent = %pubkey, "Removed Agent");
            self.archive_authority(&mut batch, &group_id, &new_head, pubkey)?;
        }

        for pubkey in diff.added.iter().chain(diff.intersection.iter()) {
            let anchor = AppEntry::GroupAuthAnchor(GroupAuthAnchorEntry(group_id.clone(), pubkey.clone()));
            let anchor_hash = self.create_if_not_exists(&mut batch, anchor)?;
            batch.put_link(self.new_link(new_head.clone(), anchor_hash, LinkType::GroupAuth, vec![])?);
        }

        self.store.commit(batch)?;

        info!(
            group_id = %group_id,
            new_head = %new_head,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "Updated group"
        );
        Ok(new_head)
    }

    /// Freeze a removed authority's content links under their archive anchor
    fn archive_authority(
        &self,
        batch: &mut WriteBatch,
        group_id: &Address,
        new_head: &Address,
        pubkey: &Address,
    ) -> CoopResult<()> {
        let anchor_hash = group_auth_anchor_hash(group_id, pubkey);
        let archive = AppEntry::GroupAuthArchiveAnchor(GroupAuthArchiveAnchorEntry(group_id.clone(), pubkey.clone()));
        let archive_hash = self.create_if_not_exists(batch, archive)?;
        debug_assert_eq!(archive_hash, group_auth_archive_anchor_hash(group_id, pubkey));

        if !batch.has_link(new_head, &archive_hash, LinkType::GroupAuthArchive, &[]) {
            batch.put_link(self.new_link(new_head.clone(), archive_hash.clone(), LinkType::GroupAuthArchive, vec![])?);
        }

        for link_type in [LinkType::Content, LinkType::ContentUpdate] {
            let existing = self.store.get_links(&archive_hash, link_type)?;
            let links = self.store.get_links(&anchor_hash, link_type)?;
            debug!(agent = %pubkey, count = links.len(), link_type = link_type.as_str(), "Copying links for auth archive");

            for link in links {
                let already = existing.iter().any(|l| l.same_edge(&link.target, link_type, &link.tag))
                    || batch.has_link(&archive_hash, &link.target, link_type, &link.tag);
                if already {
                    continue;
                }
                // Original author and tick are kept so ordering across anchors is unchanged
                batch.put_link(Link::new(
                    archive_hash.clone(),
                    link.target,
                    link_type,
                    link.tag,
                    link.author,
                    link.tick,
                )?);
            }
        }
        Ok(())
    }

    /// Groups an agent has created
    pub fn get_agent_groups(&self, agent: &Address) -> CoopResult<Vec<Address>> {
        Ok(self
            .store
            .get_links(agent, LinkType::AgentToGroup)?
            .into_iter()
            .map(|link| link.target)
            .collect())
    }

    /// Groups this agent has created
    pub fn get_my_groups(&self) -> CoopResult<Vec<Address>> {
        self.get_agent_groups(&self.agent)
    }
}
