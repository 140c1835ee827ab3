//! Key→shard→servers resolution.

use crate::server::{Group, Server, ServerStatus};
use crate::store::Persister;

use super::hash::{self, HashBucket};
use super::key::ShardKey;
use super::mapping::{ShardMapping, ShardTable};
use super::range::{self, ShardRange};
use super::shard::{Shard, ShardState};
use super::{Error, ShardingType};

/// Whether a lookup wants the shard holding the key or the mapping's
/// global group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupHint {
    Local,
    Global,
}

/// An ordered list of candidate servers for one lookup.
#[derive(Debug, Clone)]
pub struct ShardLookup {
    /// Absent for GLOBAL lookups.
    pub shard_id: Option<u32>,
    pub group_id: String,
    /// Primary first, then secondaries by descending weight.
    pub servers: Vec<Server>,
    /// The group currently has no primary; only secondaries are listed.
    pub no_primary: bool,
}

/// Resolve `key` against `table_name`'s mapping.
pub async fn lookup(
    persister: &mut Persister,
    table_name: &str,
    key: &str,
    hint: LookupHint,
) -> Result<ShardLookup, Error> {
    let table = ShardTable::require(persister, table_name).await?;
    let mapping = ShardMapping::require(persister, table.shard_mapping_id).await?;

    let (shard_id, group_id) = match hint {
        LookupHint::Global => (None, mapping.global_group_id.clone()),
        LookupHint::Local => {
            let shard_id = resolve_shard(persister, &mapping, key).await?;
            let shard = Shard::require(persister, shard_id).await?;
            if shard.state == ShardState::Disabled {
                return Err(Error::ShardDisabled(shard_id));
            }
            (Some(shard_id), shard.group_id)
        }
    };

    let group = Group::require(persister, &group_id).await?;
    let members = group.servers(persister).await?;

    let mut primary: Vec<Server> = Vec::new();
    let mut secondaries: Vec<Server> = Vec::new();
    for server in members {
        match server.status {
            ServerStatus::Primary => primary.push(server),
            ServerStatus::Secondary => secondaries.push(server),
            _ => (),
        }
    }
    secondaries.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.uuid.cmp(&b.uuid))
    });

    let no_primary = primary.is_empty();
    let mut servers = primary;
    servers.extend(secondaries);

    Ok(ShardLookup {
        shard_id,
        group_id,
        servers,
        no_primary,
    })
}

/// The shard covering `key` under `mapping`.
pub async fn resolve_shard(
    persister: &mut Persister,
    mapping: &ShardMapping,
    key: &str,
) -> Result<u32, Error> {
    match mapping.type_name {
        ShardingType::Hash => {
            let buckets: Vec<HashBucket> =
                HashBucket::list(persister, mapping.shard_mapping_id).await?;
            if buckets.is_empty() {
                return Err(Error::NoShards(mapping.shard_mapping_id));
            }
            let digest = hash::hash_key(key);
            hash::pick_bucket(&buckets, &digest)
                .ok_or(Error::NoShards(mapping.shard_mapping_id))
        }
        kind => {
            let rows: Vec<ShardRange> =
                ShardRange::list(persister, mapping.shard_mapping_id).await?;
            if rows.is_empty() {
                return Err(Error::NoShards(mapping.shard_mapping_id));
            }
            let ranges = range::typed_ranges(&rows, kind)?;
            let key = ShardKey::parse(key, kind)?;
            range::pick_shard(&ranges, &key).ok_or_else(|| match &key {
                ShardKey::Int(value) => Error::NoCoveringShard(value.to_string()),
                ShardKey::Str(value) => Error::NoCoveringShard(value.clone()),
                ShardKey::Datetime(value) => Error::NoCoveringShard(value.to_string()),
            })
        }
    }
}
