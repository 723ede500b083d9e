//! Integration tests for content links and latest-version resolution

use coop_content::{
    Address, CoopContent, CoopResult, CreateContentLinkInput, CreateContentUpdateLinkInput, CreateGroupInput,
    GetGroupContentInput, HashKind, Link, LinkType, MemoryStore, Record, SledStore, Store, Tick, WriteBatch,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn agent(name: &str) -> Address {
    Address::hash_bytes(HashKind::Agent, name.as_bytes())
}

fn content(name: &str) -> Address {
    Address::hash_bytes(HashKind::Entry, name.as_bytes())
}

fn as_agent<S: Store>(store: &Arc<S>, name: &str) -> CoopContent<S> {
    CoopContent::new(Arc::clone(store), agent(name))
}

fn create_group<S: Store>(coop: &CoopContent<S>, members: &[&str]) -> Address {
    coop.create_group(CreateGroupInput {
        members: members.iter().map(|m| agent(m)).collect(),
        admin: coop.agent().clone(),
        metadata: Default::default(),
    })
    .unwrap()
}

fn link<S: Store>(coop: &CoopContent<S>, group_id: &Address, target: &str) -> Address {
    coop.create_content_link(CreateContentLinkInput {
        group_id: group_id.clone(),
        content_target: content(target),
    })
    .unwrap()
}

fn update<S: Store>(coop: &CoopContent<S>, group_id: &Address, content_id: &str, prev: &str, next: &str) -> Address {
    coop.create_content_update_link(CreateContentUpdateLinkInput {
        group_id: group_id.clone(),
        content_id: content(content_id),
        content_prev: content(prev),
        content_next: content(next),
    })
    .unwrap()
}

fn latest<S: Store>(coop: &CoopContent<S>, group_id: &Address, content_id: &str) -> Address {
    coop.get_group_content_latest(GetGroupContentInput {
        group_id: group_id.clone(),
        content_id: content(content_id),
    })
    .unwrap()
}

fn history<S: Store>(coop: &CoopContent<S>, group_id: &Address, content_id: &str) -> Vec<Address> {
    coop.get_group_content_history(GetGroupContentInput {
        group_id: group_id.clone(),
        content_id: content(content_id),
    })
    .unwrap()
}

/// Test the full flow: create, drop a member, link and update content
#[test]
fn test_end_to_end_group_and_content() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");

    let group_id = create_group(&admin, &["m1"]);
    let mut entry = admin.get_group(&group_id).unwrap();
    entry.members = vec![];
    admin.update_group(&group_id, entry).unwrap();
    assert!(admin.get_group(&group_id).unwrap().members.is_empty());

    link(&admin, &group_id, "c1");
    assert_eq!(latest(&admin, &group_id, "c1"), content("c1"));

    update(&admin, &group_id, "c1", "c1", "c1a");
    assert_eq!(latest(&admin, &group_id, "c1"), content("c1a"));
}

/// Test that a linear chain resolves to its last version
#[test]
fn test_chain_follows_every_version() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    link(&admin, &group_id, "c");
    update(&admin, &group_id, "c", "c", "x");
    update(&admin, &group_id, "c", "x", "y");

    assert_eq!(latest(&admin, &group_id, "c"), content("y"));
    assert_eq!(
        history(&admin, &group_id, "c"),
        vec![content("c"), content("x"), content("y")]
    );
}

/// Test that a branch resolves to the newest edge regardless of author
#[test]
fn test_branch_resolves_to_newest_edge_across_authors() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let member = as_agent(&store, "m1");
    let group_id = create_group(&admin, &["m1"]);

    link(&admin, &group_id, "c");
    update(&admin, &group_id, "c", "c", "from-admin");
    update(&member, &group_id, "c", "c", "from-member");

    // The member's edge was written last
    assert_eq!(latest(&admin, &group_id, "c"), content("from-member"));
    assert_eq!(latest(&member, &group_id, "c"), content("from-member"));

    // Extending the older branch moves nothing; the walk never visits it
    update(&admin, &group_id, "c", "from-admin", "from-admin-2");
    assert_eq!(latest(&admin, &group_id, "c"), content("from-member"));
}

/// Test that update edges only apply to the content item they name
#[test]
fn test_update_links_are_scoped_by_content_id() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    link(&admin, &group_id, "p");
    link(&admin, &group_id, "q");
    update(&admin, &group_id, "q", "p", "stray");

    assert_eq!(latest(&admin, &group_id, "p"), content("p"));
    assert_eq!(latest(&admin, &group_id, "q"), content("q"));
}

/// Test that linking the same first version twice reuses the link
#[test]
fn test_repeated_content_links_are_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    let first = link(&admin, &group_id, "c");
    let again = link(&admin, &group_id, "c");
    assert_eq!(first, again);
    assert_eq!(admin.get_group_content_targets(&group_id).unwrap(), vec![content("c")]);
}

/// Test that re-issuing an older update edge makes it the newest
#[test]
fn test_reissued_update_edge_wins() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    link(&admin, &group_id, "c");
    let first = update(&admin, &group_id, "c", "c", "x");
    update(&admin, &group_id, "c", "c", "y");
    assert_eq!(latest(&admin, &group_id, "c"), content("y"));

    let reissued = update(&admin, &group_id, "c", "c", "x");
    assert_ne!(first, reissued);
    assert_eq!(latest(&admin, &group_id, "c"), content("x"));
}

/// Test that pointing a version back at an earlier one reverts to it
#[test]
fn test_revert_to_earlier_version() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    link(&admin, &group_id, "v1");
    update(&admin, &group_id, "v1", "v1", "v2");
    update(&admin, &group_id, "v1", "v2", "v1");

    assert_eq!(latest(&admin, &group_id, "v1"), content("v1"));
    assert_eq!(
        history(&admin, &group_id, "v1"),
        vec![content("v1"), content("v2"), content("v1")]
    );

    update(&admin, &group_id, "v1", "v1", "v3");
    assert_eq!(latest(&admin, &group_id, "v1"), content("v3"));
}

/// Test that targets list the latest version of each item in creation order
#[test]
fn test_targets_list_latest_of_each_item() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let member = as_agent(&store, "m1");
    let group_id = create_group(&admin, &["m1"]);

    link(&admin, &group_id, "a");
    link(&member, &group_id, "b");
    update(&member, &group_id, "a", "a", "a2");

    assert_eq!(
        admin.get_group_content_targets(&group_id).unwrap(),
        vec![content("a2"), content("b")]
    );
}

/// Test that an agent outside the group cannot link content
#[test]
fn test_outsider_cannot_write() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let outsider = as_agent(&store, "zed");
    let group_id = create_group(&admin, &["m1"]);

    let err = outsider
        .create_content_link(CreateContentLinkInput {
            group_id: group_id.clone(),
            content_target: content("spam"),
        })
        .unwrap_err();
    assert_eq!(err.kind(), "Unauthorized");
    assert!(admin.get_group_content_targets(&group_id).unwrap().is_empty());
}

/// Test that a removed member's content stays resolvable through the archive
#[test]
fn test_removed_member_content_stays_resolvable() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let member = as_agent(&store, "m1");
    let group_id = create_group(&admin, &["m1"]);

    link(&member, &group_id, "doc");
    update(&member, &group_id, "doc", "doc", "doc-v2");

    let mut entry = admin.get_group(&group_id).unwrap();
    entry.members.clear();
    let rev2 = admin.update_group(&group_id, entry).unwrap();

    assert_eq!(latest(&admin, &group_id, "doc"), content("doc-v2"));

    // Their new writes are refused
    let err = member
        .create_content_update_link(CreateContentUpdateLinkInput {
            group_id: group_id.clone(),
            content_id: content("doc"),
            content_prev: content("doc-v2"),
            content_next: content("doc-v3"),
        })
        .unwrap_err();
    assert_eq!(err.kind(), "Unauthorized");

    // The admin continues the chain from the archived version
    update(&admin, &group_id, "doc", "doc-v2", "doc-v3");
    assert_eq!(latest(&admin, &group_id, "doc"), content("doc-v3"));

    // Archive links carry forward through later revisions
    let mut entry = admin.get_group(&group_id).unwrap();
    entry.members = vec![agent("m5")];
    admin.update_group(&rev2, entry).unwrap();
    assert_eq!(
        history(&admin, &group_id, "doc"),
        vec![content("doc"), content("doc-v2"), content("doc-v3")]
    );
}

/// Test reads against unknown content and unknown groups
#[test]
fn test_content_reads_on_unknown_input() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    let missing_content = admin
        .get_group_content_latest(GetGroupContentInput {
            group_id: group_id.clone(),
            content_id: content("never linked"),
        })
        .unwrap_err();
    assert_eq!(missing_content.kind(), "NotFound");

    let missing_group = admin
        .get_group_content_latest(GetGroupContentInput {
            group_id: content("not a group"),
            content_id: content("c"),
        })
        .unwrap_err();
    assert_eq!(missing_group.kind(), "NotFound");
}

/// Test that a long linear chain resolves to its last version
#[test]
fn test_long_chain_resolves() {
    let store = Arc::new(MemoryStore::new());
    let admin = as_agent(&store, "a2");
    let group_id = create_group(&admin, &[]);

    link(&admin, &group_id, "v0");
    for i in 0..300 {
        update(&admin, &group_id, "v0", &format!("v{}", i), &format!("v{}", i + 1));
    }

    assert_eq!(latest(&admin, &group_id, "v0"), content("v300"));
    assert_eq!(history(&admin, &group_id, "v0").len(), 301);
}

/// Store that runs one pending write right after the first multi-base read,
/// as a concurrent writer would
struct InterleavingStore<S: Store> {
    inner: Arc<S>,
    pending: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<S: Store> Store for InterleavingStore<S> {
    fn tick(&self) -> CoopResult<Tick> {
        self.inner.tick()
    }

    fn get_record(&self, address: &Address) -> CoopResult<Option<Record>> {
        self.inner.get_record(address)
    }

    fn get_links(&self, base: &Address, link_type: LinkType) -> CoopResult<Vec<Link>> {
        self.inner.get_links(base, link_type)
    }

    fn get_links_many(&self, bases: &[Address], link_types: &[LinkType]) -> CoopResult<Vec<Link>> {
        let links = self.inner.get_links_many(bases, link_types)?;
        let pending = self.pending.lock().unwrap().take();
        if let Some(write) = pending {
            write();
        }
        Ok(links)
    }

    fn commit(&self, batch: WriteBatch) -> CoopResult<()> {
        self.inner.commit(batch)
    }
}

fn resolves_against_one_view<S: Store + 'static>(inner: Arc<S>) {
    let writer = as_agent(&inner, "a2");
    let group_id = create_group(&writer, &[]);
    link(&writer, &group_id, "c");

    let pending: Box<dyn FnOnce() + Send> = {
        let writer = writer.clone();
        let group_id = group_id.clone();
        Box::new(move || {
            update(&writer, &group_id, "c", "c", "c2");
        })
    };
    let store = Arc::new(InterleavingStore {
        inner,
        pending: Mutex::new(Some(pending)),
    });
    let reader = as_agent(&store, "a2");

    // The update commits after the read; this call must not see it
    assert_eq!(reader.get_group_content_targets(&group_id).unwrap(), vec![content("c")]);
    assert_eq!(reader.get_group_content_targets(&group_id).unwrap(), vec![content("c2")]);
}

/// Test that a commit landing mid-resolution is not half-seen (memory)
#[test]
fn test_memory_resolution_reads_one_view() {
    resolves_against_one_view(Arc::new(MemoryStore::new()));
}

/// Test that a commit landing mid-resolution is not half-seen (sled)
#[test]
fn test_sled_resolution_reads_one_view() {
    let temp_dir = TempDir::new().unwrap();
    resolves_against_one_view(Arc::new(SledStore::open(temp_dir.path().join("store.sled")).unwrap()));
}

/// Test that edges written after a reopen order after earlier ones
#[test]
fn test_sled_clock_orders_edges_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("store.sled");

    let group_id = {
        let store = Arc::new(SledStore::open(&db_path).unwrap());
        let admin = as_agent(&store, "a2");
        let group_id = create_group(&admin, &[]);
        link(&admin, &group_id, "c");
        update(&admin, &group_id, "c", "c", "before");
        store.flush().unwrap();
        group_id
    };

    let store = Arc::new(SledStore::open(&db_path).unwrap());
    let admin = as_agent(&store, "a2");
    assert_eq!(latest(&admin, &group_id, "c"), content("before"));

    update(&admin, &group_id, "c", "c", "after");
    assert_eq!(latest(&admin, &group_id, "c"), content("after"));
}
