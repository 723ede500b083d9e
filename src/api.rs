//! Call surface
//!
//! [`CoopContent`] binds an agent identity to a shared store. Typed methods
//! live next to their component (`group`, `content`); this module adds the
//! by-name JSON dispatcher used by the CLI and any RPC front end.
//!
//! Payload addresses are parsed before the dispatcher reaches the store, so
//! a short, mislabeled or corrupted address fails with `MalformedAddress`
//! without a single read.

use crate::anchor::{group_auth_anchor_hash, group_auth_archive_anchor_hash};
use crate::content::{CreateContentLinkInput, CreateContentUpdateLinkInput, GetGroupContentInput};
use crate::error::{CoopError, CoopResult};
use crate::group::{CreateGroupInput, GroupEntry};
use crate::hash::{Address, HashKind, ADDRESS_LEN};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Input for `update_group`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInput {
    pub base: Address,
    pub entry: GroupEntry,
}

/// Input for the anchor derivations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAuthAnchorInput {
    pub group_id: Address,
    pub author: Address,
}

/// Group and content operations for one agent
pub struct CoopContent<S: Store> {
    pub(crate) store: Arc<S>,
    pub(crate) agent: Address,
}

impl<S: Store> Clone for CoopContent<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            agent: self.agent.clone(),
        }
    }
}

/// Functions reachable through [`CoopContent::call`]
pub const FUNCTIONS: &[&str] = &[
    "create_group",
    "update_group",
    "get_group",
    "get_group_head",
    "get_group_history",
    "get_my_groups",
    "create_content_link",
    "create_content_update_link",
    "get_group_content_latest",
    "get_group_content_history",
    "get_group_content_targets",
    "group_auth_anchor_hash",
    "group_auth_archive_anchor_hash",
];

impl<S: Store> CoopContent<S> {
    pub fn new(store: Arc<S>, agent: Address) -> Self {
        Self { store, agent }
    }

    /// Same store, acting as another agent
    pub fn as_agent(&self, agent: Address) -> Self {
        Self {
            agent,
            ..self.clone()
        }
    }

    pub fn agent(&self) -> &Address {
        &self.agent
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn group_auth_anchor_hash(&self, input: &GroupAuthAnchorInput) -> Address {
        group_auth_anchor_hash(&input.group_id, &input.author)
    }

    pub fn group_auth_archive_anchor_hash(&self, input: &GroupAuthAnchorInput) -> Address {
        group_auth_archive_anchor_hash(&input.group_id, &input.author)
    }

    /// Invoke an operation by name with a JSON payload
    pub fn call(&self, function: &str, payload: &Value) -> CoopResult<Value> {
        debug!(function = function, "Dispatching call");
        let payload = Payload(payload);

        let output = match function {
            "create_group" => {
                let input = CreateGroupInput {
                    members: payload.addresses("members")?,
                    admin: payload.address("admin")?,
                    metadata: payload.optional("metadata")?.unwrap_or_default(),
                };
                json!(self.create_group(input)?)
            }
            "update_group" => {
                let base = payload.address("base")?;
                let entry = payload.field("entry")?;
                let group = GroupEntry {
                    admins: entry.addresses("admins")?,
                    members: entry.optional_addresses("members")?,
                    deleted: entry.optional("deleted")?,
                    published_at: entry.optional("published_at")?.unwrap_or_default(),
                    last_updated: entry.optional("last_updated")?.unwrap_or_default(),
                    metadata: entry.optional("metadata")?.unwrap_or_default(),
                };
                json!(self.update_group(&base, group)?)
            }
            "get_group" => json!(self.get_group(&payload.group_id()?)?),
            "get_group_head" => json!(self.get_group_head(&payload.group_id()?)?),
            "get_group_history" => json!(self.get_group_history(&payload.group_id()?)?),
            "get_my_groups" => json!(self.get_my_groups()?),
            "create_content_link" => {
                let input = CreateContentLinkInput {
                    group_id: payload.address("group_id")?,
                    content_target: payload.address("content_target")?,
                };
                json!(self.create_content_link(input)?)
            }
            "create_content_update_link" => {
                let input = CreateContentUpdateLinkInput {
                    group_id: payload.address("group_id")?,
                    content_id: payload.address("content_id")?,
                    content_prev: payload.address("content_prev")?,
                    content_next: payload.address("content_next")?,
                };
                json!(self.create_content_update_link(input)?)
            }
            "get_group_content_latest" => {
                json!(self.get_group_content_latest(payload.content_input()?)?)
            }
            "get_group_content_history" => {
                json!(self.get_group_content_history(payload.content_input()?)?)
            }
            "get_group_content_targets" => {
                json!(self.get_group_content_targets(&payload.group_id()?)?)
            }
            "group_auth_anchor_hash" => json!(self.group_auth_anchor_hash(&payload.anchor_input()?)),
            "group_auth_archive_anchor_hash" => {
                json!(self.group_auth_archive_anchor_hash(&payload.anchor_input()?))
            }
            other => return Err(CoopError::UnknownFunction(other.to_string())),
        };

        Ok(output)
    }
}

/// Field access over a JSON payload with address validation
struct Payload<'a>(&'a Value);

fn parse_address(field: &str, value: &Value) -> CoopResult<Address> {
    match value {
        Value::String(text) => text.parse(),
        Value::Array(items) if items.len() != ADDRESS_LEN => Err(CoopError::malformed(format!(
            "{} has {} bytes, expected {}",
            field,
            items.len(),
            ADDRESS_LEN
        ))),
        Value::Array(items) => {
            let bytes = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| CoopError::malformed(format!("{} contains a non-byte value {}", field, item)))
                })
                .collect::<CoopResult<Vec<u8>>>()?;
            Address::from_raw_39(&bytes)
        }
        other => Err(CoopError::malformed(format!(
            "{} must be an address string or byte array, got {}",
            field, other
        ))),
    }
}

impl<'a> Payload<'a> {
    fn object(&self) -> CoopResult<&'a Map<String, Value>> {
        self.0
            .as_object()
            .ok_or_else(|| CoopError::Validation(format!("expected an object payload, got {}", self.0)))
    }

    fn get(&self, field: &str) -> CoopResult<Option<&'a Value>> {
        Ok(self.object()?.get(field).filter(|v| !v.is_null()))
    }

    fn required(&self, field: &str) -> CoopResult<&'a Value> {
        self.get(field)?
            .ok_or_else(|| CoopError::Validation(format!("missing field `{}`", field)))
    }

    fn field(&self, field: &str) -> CoopResult<Payload<'a>> {
        Ok(Payload(self.required(field)?))
    }

    fn address(&self, field: &str) -> CoopResult<Address> {
        parse_address(field, self.required(field)?)
    }

    fn addresses(&self, field: &str) -> CoopResult<Vec<Address>> {
        match self.required(field)? {
            Value::Array(items) => items.iter().map(|item| parse_address(field, item)).collect(),
            other => Err(CoopError::Validation(format!("`{}` must be a list, got {}", field, other))),
        }
    }

    fn optional_addresses(&self, field: &str) -> CoopResult<Vec<Address>> {
        match self.get(field)? {
            Some(_) => self.addresses(field),
            None => Ok(Vec::new()),
        }
    }

    fn optional<T: DeserializeOwned>(&self, field: &str) -> CoopResult<Option<T>> {
        self.get(field)?
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(CoopError::from)
    }

    /// A bare address payload, or an object carrying `group_id`
    fn group_id(&self) -> CoopResult<Address> {
        match self.0 {
            Value::Object(_) => self.address("group_id"),
            bare => parse_address("group_id", bare),
        }
    }

    fn content_input(&self) -> CoopResult<GetGroupContentInput> {
        Ok(GetGroupContentInput {
            group_id: self.address("group_id")?,
            content_id: self.address("content_id")?,
        })
    }

    fn anchor_input(&self) -> CoopResult<GroupAuthAnchorInput> {
        Ok(GroupAuthAnchorInput {
            group_id: self.address("group_id")?,
            author: self.address("author")?.ensure_kind(HashKind::Agent)?,
        })
    }
}
