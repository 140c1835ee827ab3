//! Shard maintenance procedures.
//!
//! Split and move are chained jobs: validate and snapshot, restore and
//! catch up over a temporary replication link, commit the mapping
//! change, then prune and refresh the range-check triggers. Everything
//! before the commit job compensates by dropping the half-built
//! destination; the commit job itself is the point of no return.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::args::{Args, Value};
use crate::events::{Dispatcher, Event};
use crate::executor::{Action, ActionRegistry, JobContext, JobError, JobSpec, Outcome};
use crate::replication::{self, ALL_THREADS};
use crate::server::{Group, Server, ServerStatus};
use crate::store::Persister;

use super::hash::{self, HashBucket};
use super::key::ShardKey;
use super::mapping::{ShardMapping, ShardTable};
use super::prune;
use super::range::{self, ShardRange};
use super::shard::{Shard, ShardState};
use super::triggers;
use super::{Error, ShardingType};

/// Catch-up budget for the temporary replication link.
const SYNC_TIMEOUT: Duration = Duration::from_secs(3_600);

pub static SHARDING_DEFINE: Lazy<Event> = Lazy::new(|| Event::new("SHARDING_DEFINE"));
pub static SHARDING_ADD_TABLE: Lazy<Event> = Lazy::new(|| Event::new("SHARDING_ADD_TABLE"));
pub static SHARDING_REMOVE_TABLE: Lazy<Event> =
    Lazy::new(|| Event::new("SHARDING_REMOVE_TABLE"));
pub static SHARDING_ADD_SHARD: Lazy<Event> = Lazy::new(|| Event::new("SHARDING_ADD_SHARD"));
pub static SHARDING_ENABLE_SHARD: Lazy<Event> =
    Lazy::new(|| Event::new("SHARDING_ENABLE_SHARD"));
pub static SHARDING_DISABLE_SHARD: Lazy<Event> =
    Lazy::new(|| Event::new("SHARDING_DISABLE_SHARD"));
pub static SHARDING_PRUNE: Lazy<Event> = Lazy::new(|| Event::new("SHARDING_PRUNE"));
pub static SHARDING_SPLIT: Lazy<Event> = Lazy::new(|| Event::new("SHARDING_SPLIT"));
pub static SHARDING_MOVE: Lazy<Event> = Lazy::new(|| Event::new("SHARDING_MOVE"));

pub fn register(
    registry: &ActionRegistry,
    dispatcher: &Dispatcher,
) -> Result<(), crate::events::Error> {
    registry.register("sharding.define_mapping", Arc::new(DefineMapping), None)?;
    registry.register("sharding.add_table", Arc::new(AddTable), None)?;
    registry.register("sharding.remove_table", Arc::new(RemoveTable), None)?;
    registry.register("sharding.add_shard", Arc::new(AddShard), None)?;
    registry.register("sharding.enable_shard", Arc::new(EnableShard), None)?;
    registry.register("sharding.disable_shard", Arc::new(DisableShard), None)?;
    registry.register("sharding.prune_shard", Arc::new(PruneShard), None)?;
    registry.register(
        "sharding.shard_relocate",
        Arc::new(RelocateShard),
        Some(Arc::new(RelocateAbort)),
    )?;
    registry.register(
        "sharding.shard_relocate_restore",
        Arc::new(RelocateRestore),
        Some(Arc::new(RelocateAbort)),
    )?;
    registry.register("sharding.shard_relocate_commit", Arc::new(RelocateCommit), None)?;
    registry.register(
        "sharding.shard_relocate_cleanup",
        Arc::new(RelocateCleanup),
        None,
    )?;

    dispatcher.register(&SHARDING_DEFINE, "sharding.define_mapping")?;
    dispatcher.register(&SHARDING_ADD_TABLE, "sharding.add_table")?;
    dispatcher.register(&SHARDING_REMOVE_TABLE, "sharding.remove_table")?;
    dispatcher.register(&SHARDING_ADD_SHARD, "sharding.add_shard")?;
    dispatcher.register(&SHARDING_ENABLE_SHARD, "sharding.enable_shard")?;
    dispatcher.register(&SHARDING_DISABLE_SHARD, "sharding.disable_shard")?;
    dispatcher.register(&SHARDING_PRUNE, "sharding.prune_shard")?;
    dispatcher.register(&SHARDING_SPLIT, "sharding.shard_relocate")?;
    dispatcher.register(&SHARDING_MOVE, "sharding.shard_relocate")?;
    Ok(())
}

pub struct DefineMapping;

#[async_trait]
impl Action for DefineMapping {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let type_name: ShardingType = job.args.get(0)?.as_str()?.parse()?;
        let global_group = job.args.get(1)?.as_str()?.to_string();

        Group::require(job.persister, &global_group).await?;
        let mapping = ShardMapping::define(job.persister, type_name, &global_group).await?;

        info!(
            "defined {} mapping ({}) with global group ({})",
            type_name, mapping.shard_mapping_id, global_group
        );
        Ok(Outcome::value(mapping.shard_mapping_id))
    }
}

pub struct AddTable;

#[async_trait]
impl Action for AddTable {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let mapping_id = job.args.get(0)?.as_int()? as u32;
        let table_name = job.args.get(1)?.as_str()?.to_string();
        let column_name = job.args.get(2)?.as_str()?.to_string();
        let is_anchor = job
            .args
            .kw("anchor")
            .map(|value| value.as_bool())
            .transpose()?
            .unwrap_or(false);

        ShardMapping::require(job.persister, mapping_id).await?;
        ShardTable::add(job.persister, mapping_id, &table_name, &column_name, is_anchor)
            .await?;
        Ok(Outcome::none())
    }
}

pub struct RemoveTable;

#[async_trait]
impl Action for RemoveTable {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let table_name = job.args.get(0)?.as_str()?.to_string();

        let table = ShardTable::require(job.persister, &table_name).await?;
        let mapping = ShardMapping::require(job.persister, table.shard_mapping_id).await?;

        // The mapping must hold no data placements any more.
        let placements = match mapping.type_name {
            ShardingType::Hash => HashBucket::list(job.persister, mapping.shard_mapping_id)
                .await?
                .len(),
            _ => ShardRange::list(job.persister, mapping.shard_mapping_id)
                .await?
                .len(),
        };
        if placements > 0 {
            return Err(JobError::msg(format!(
                "mapping ({}) still has {} shard placement(s)",
                mapping.shard_mapping_id, placements
            )));
        }

        ShardTable::remove(job.persister, &table_name).await?;
        if ShardTable::of_mapping(job.persister, mapping.shard_mapping_id)
            .await?
            .is_empty()
        {
            ShardMapping::remove(job.persister, mapping.shard_mapping_id).await?;
        }
        Ok(Outcome::none())
    }
}

pub struct AddShard;

#[async_trait]
impl Action for AddShard {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let mapping_id = job.args.get(0)?.as_int()? as u32;
        let spec = job.args.get(1)?.as_str()?.to_string();
        let state: ShardState = job
            .args
            .get(2)
            .ok()
            .and_then(|value| value.as_str().ok())
            .unwrap_or("ENABLED")
            .parse()?;

        let mapping = ShardMapping::require(job.persister, mapping_id).await?;
        let mut created = Vec::new();

        match mapping.type_name {
            ShardingType::Hash => {
                // "group, group, …": bounds are placed evenly on the
                // ring relative to the existing bucket count.
                let groups: Vec<&str> = spec
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .collect();
                let existing = HashBucket::list(job.persister, mapping_id).await?.len();
                let bounds = hash::place_buckets(existing, groups.len());

                for (group_id, bound) in groups.iter().zip(bounds) {
                    Group::require(job.persister, group_id).await?;
                    let shard = Shard::add(job.persister, group_id, state).await?;
                    HashBucket::add(job.persister, mapping_id, &bound, shard.shard_id).await?;
                    created.push(shard.shard_id);
                }
            }
            kind => {
                // "group_id/lower_bound, …" with strictly increasing
                // bounds.
                let rows = ShardRange::list(job.persister, mapping_id).await?;
                let mut existing = range::typed_ranges(&rows, kind)?;

                for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
                    let (group_id, bound) = part
                        .split_once('/')
                        .ok_or_else(|| Error::BadKey {
                            key: part.into(),
                            kind: "group_id/lower_bound",
                        })?;
                    let group_id = group_id.trim();
                    let bound = bound.trim();

                    Group::require(job.persister, group_id).await?;
                    let key = ShardKey::parse(bound, kind)?;
                    range::validate_increasing(&existing, &key, bound)?;

                    let shard = Shard::add(job.persister, group_id, state).await?;
                    ShardRange::add(job.persister, mapping_id, bound, shard.shard_id).await?;
                    existing.push(range::TypedRange {
                        lower_bound: key,
                        raw_bound: bound.to_string(),
                        shard_id: shard.shard_id,
                    });
                    created.push(shard.shard_id);
                }
            }
        }

        refresh_triggers(job, &mapping, &created).await?;

        info!(
            "added {} shard(s) to mapping ({})",
            created.len(),
            mapping_id
        );
        Ok(Outcome::value(Value::List(
            created.into_iter().map(Value::from).collect(),
        )))
    }
}

pub struct EnableShard;

#[async_trait]
impl Action for EnableShard {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let shard_id = job.args.get(0)?.as_int()? as u32;
        Shard::require(job.persister, shard_id).await?;
        Shard::update_state(job.persister, shard_id, ShardState::Enabled).await?;
        Ok(Outcome::none())
    }
}

pub struct DisableShard;

#[async_trait]
impl Action for DisableShard {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let shard_id = job.args.get(0)?.as_int()? as u32;
        Shard::require(job.persister, shard_id).await?;
        Shard::update_state(job.persister, shard_id, ShardState::Disabled).await?;
        Ok(Outcome::none())
    }
}

pub struct PruneShard;

#[async_trait]
impl Action for PruneShard {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let table_name = job.args.get(0)?.as_str()?.to_string();
        prune::prune_shard(job.persister, job.ctx.pool(), &table_name).await?;
        Ok(Outcome::none())
    }
}

/// First job of split and move: validate, pause detection on the
/// destination, snapshot the source.
pub struct RelocateShard;

#[async_trait]
impl Action for RelocateShard {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let shard_id = job.args.get(0)?.as_int()? as u32;
        let dest_group_id = job.args.get(1)?.as_str()?.to_string();
        let split_point = match job.args.get(2) {
            Ok(value) if !value.is_null() => Some(value.as_str()?.to_string()),
            _ => None,
        };
        let is_move = job
            .args
            .kw("move")
            .map(|value| value.as_bool())
            .transpose()?
            .unwrap_or(false);

        let shard = Shard::require(job.persister, shard_id).await?;
        if shard.state == ShardState::Disabled {
            return Err(Error::ShardDisabled(shard_id).into());
        }
        Group::require(job.persister, &dest_group_id).await?;
        group_primary(job.persister, &dest_group_id).await?;
        let source_primary = group_primary(job.persister, &shard.group_id).await?;

        let (mapping_id, split_point) = if is_move {
            let mapping_id = placement_mapping(job.persister, shard_id).await?;
            (mapping_id, String::new())
        } else {
            validated_split_point(job.persister, shard_id, split_point).await?
        };

        // Pause failure detection on the destination while it catches
        // up over the temporary link.
        Group::set_active(job.persister, &dest_group_id, false).await?;
        job.ctx.detector().unwatch(&dest_group_id);

        let image = job.ctx.snapshotter().backup(&source_primary).await?;
        info!(
            "snapshot of shard ({}) taken from ({})",
            shard_id, source_primary.uuid
        );

        Ok(Outcome::none().then(JobSpec::named(
            "sharding.shard_relocate_restore",
            "Restoring the snapshot onto the destination group.",
            Args::new()
                .with(shard_id)
                .with(dest_group_id.as_str())
                .with(split_point.as_str())
                .with(image.path.display().to_string())
                .with(mapping_id)
                .with_kw("move", is_move),
        )))
    }
}

/// Second job: restore the snapshot and catch up from the source over a
/// temporary replication link.
pub struct RelocateRestore;

#[async_trait]
impl Action for RelocateRestore {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let shard_id = job.args.get(0)?.as_int()? as u32;
        let dest_group_id = job.args.get(1)?.as_str()?.to_string();
        let image_path = job.args.get(3)?.as_str()?.to_string();

        let shard = Shard::require(job.persister, shard_id).await?;
        let source_primary = group_primary(job.persister, &shard.group_id).await?;
        let dest_primary = group_primary(job.persister, &dest_group_id).await?;

        let image = super::BackupImage {
            path: image_path.into(),
        };
        job.ctx.snapshotter().restore(&dest_primary, &image).await?;

        // Temporary replication link: destination follows the source
        // until it has everything.
        let mut conn = job.ctx.pool().get(&dest_primary).await?;
        replication::switch_master(
            &mut conn,
            &source_primary,
            &source_primary.user,
            &source_primary.password,
            true,
            None,
            None,
        )
        .await?;
        replication::start_slave(&mut conn, ALL_THREADS, true, sync_budget()).await?;

        let mut source_conn = job.ctx.pool().get(&source_primary).await?;
        replication::sync_slave_with_master(&mut conn, &mut source_conn, sync_budget()).await?;

        info!(
            "destination group ({}) caught up with shard ({})",
            dest_group_id, shard_id
        );
        Ok(Outcome::none().then(JobSpec::named(
            "sharding.shard_relocate_commit",
            "Committing the new shard placement.",
            job.args.clone(),
        )))
    }
}

/// Compensation for the jobs before the commit point: stop the
/// temporary link and resume failure detection on the destination.
pub struct RelocateAbort;

#[async_trait]
impl Action for RelocateAbort {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let dest_group_id = job.args.get(1)?.as_str()?.to_string();

        if let Ok(dest_primary) = group_primary(job.persister, &dest_group_id).await {
            if let Ok(mut conn) = job.ctx.pool().get(&dest_primary).await {
                let _ = replication::stop_slave(
                    &mut conn,
                    ALL_THREADS,
                    true,
                    Duration::from_secs(5),
                )
                .await;
                let _ = replication::reset_slave(&mut conn, true).await;
            }
        }
        Group::set_active(job.persister, &dest_group_id, true).await?;
        job.ctx.detector().watch(job.ctx, &dest_group_id);
        Ok(Outcome::none())
    }
}

/// Third job, the commit point: rewrite the placement tables atomically
/// and cut the temporary link.
pub struct RelocateCommit;

#[async_trait]
impl Action for RelocateCommit {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let shard_id = job.args.get(0)?.as_int()? as u32;
        let dest_group_id = job.args.get(1)?.as_str()?.to_string();
        let split_point = job.args.get(2)?.as_str()?.to_string();
        let mapping_id = job.args.get(4)?.as_int()? as u32;
        let is_move = job
            .args
            .kw("move")
            .map(|value| value.as_bool())
            .transpose()?
            .unwrap_or(false);

        let mapping = ShardMapping::require(job.persister, mapping_id).await?;

        let touched = if is_move {
            Shard::update_group(job.persister, shard_id, &dest_group_id).await?;
            vec![shard_id]
        } else {
            // The upper half of the key interval goes to a new shard on
            // the destination group.
            let new_shard =
                Shard::add(job.persister, &dest_group_id, ShardState::Enabled).await?;
            match mapping.type_name {
                ShardingType::Hash => {
                    HashBucket::add(
                        job.persister,
                        mapping_id,
                        &split_point,
                        new_shard.shard_id,
                    )
                    .await?;
                }
                _ => {
                    ShardRange::add(
                        job.persister,
                        mapping_id,
                        &split_point,
                        new_shard.shard_id,
                    )
                    .await?;
                }
            }
            vec![shard_id, new_shard.shard_id]
        };

        // Cut the temporary link and resume detection.
        let dest_primary = group_primary(job.persister, &dest_group_id).await?;
        let mut conn = job.ctx.pool().get(&dest_primary).await?;
        let _ = replication::stop_slave(&mut conn, ALL_THREADS, true, Duration::from_secs(5))
            .await;
        replication::reset_slave(&mut conn, true).await?;
        drop(conn);

        Group::set_active(job.persister, &dest_group_id, true).await?;
        job.ctx.detector().watch(job.ctx, &dest_group_id);

        let mut args = Args::new().with(mapping_id);
        for shard in &touched {
            args = args.with(*shard);
        }
        Ok(Outcome::none().then(JobSpec::named(
            "sharding.shard_relocate_cleanup",
            "Pruning relocated shards and refreshing range checks.",
            args.with_kw("move", is_move),
        )))
    }
}

/// Final job: prune the affected shards and refresh their triggers.
pub struct RelocateCleanup;

#[async_trait]
impl Action for RelocateCleanup {
    async fn run(&self, job: &mut JobContext<'_>) -> Result<Outcome, JobError> {
        let mapping_id = job.args.get(0)?.as_int()? as u32;
        let is_move = job
            .args
            .kw("move")
            .map(|value| value.as_bool())
            .transpose()?
            .unwrap_or(false);

        let mut touched = Vec::new();
        let mut index = 1;
        while let Ok(value) = job.args.get(index) {
            touched.push(value.as_int()? as u32);
            index += 1;
        }

        let mapping = ShardMapping::require(job.persister, mapping_id).await?;

        if !is_move {
            for table in ShardTable::of_mapping(job.persister, mapping_id).await? {
                prune::prune_shard(job.persister, job.ctx.pool(), &table.table_name).await?;
            }
        }
        refresh_triggers(job, &mapping, &touched).await?;
        Ok(Outcome::none())
    }
}

/// Catch-up budget; a function so the restore job can name it.
fn sync_budget() -> Duration {
    SYNC_TIMEOUT
}

/// The mapping a shard's placement row belongs to.
async fn placement_mapping(
    persister: &mut Persister,
    shard_id: u32,
) -> Result<u32, Error> {
    if let Some(row) = ShardRange::of_shard(persister, shard_id).await? {
        return Ok(row.shard_mapping_id);
    }
    if let Some(bucket) = HashBucket::of_shard(persister, shard_id).await? {
        return Ok(bucket.shard_mapping_id);
    }
    Err(Error::ShardNotFound(shard_id))
}

/// Resolve and validate the split point. HASH mappings default to the
/// midpoint of the bucket's arc.
async fn validated_split_point(
    persister: &mut Persister,
    shard_id: u32,
    split_point: Option<String>,
) -> Result<(u32, String), Error> {
    if let Some(row) = ShardRange::of_shard(persister, shard_id).await? {
        let mapping = ShardMapping::require(persister, row.shard_mapping_id).await?;
        let point = split_point.ok_or_else(|| Error::SplitPointOutOfRange("".into()))?;

        let rows = ShardRange::list(persister, row.shard_mapping_id).await?;
        let ranges = range::typed_ranges(&rows, mapping.type_name)?;
        let (own, next) = range::bounds_of(&ranges, shard_id)
            .ok_or(Error::ShardNotFound(shard_id))?;

        let key = ShardKey::parse(&point, mapping.type_name)?;
        let above_lower = own.lower_bound.compare(&key) == std::cmp::Ordering::Less;
        let below_upper = next
            .map(|next| key.compare(&next.lower_bound) == std::cmp::Ordering::Less)
            .unwrap_or(true);
        if !above_lower || !below_upper {
            return Err(Error::SplitPointOutOfRange(point));
        }
        return Ok((row.shard_mapping_id, point));
    }

    if let Some(bucket) = HashBucket::of_shard(persister, shard_id).await? {
        if let Some(point) = split_point {
            return Ok((bucket.shard_mapping_id, point));
        }
        // Midpoint of the bucket's arc.
        let buckets = HashBucket::list(persister, bucket.shard_mapping_id).await?;
        let mut bounds: Vec<u128> = buckets
            .iter()
            .filter_map(|bucket| u128::from_str_radix(&bucket.lower_bound, 16).ok())
            .collect();
        bounds.sort_unstable();

        let own = u128::from_str_radix(&bucket.lower_bound, 16)
            .map_err(|_| Error::MalformedRow("lower_bound"))?;
        let upper = bounds
            .iter()
            .find(|bound| **bound > own)
            .copied()
            .unwrap_or(u128::MAX);
        let midpoint = own + (upper - own) / 2;
        return Ok((bucket.shard_mapping_id, format!("{:032x}", midpoint)));
    }

    Err(Error::ShardNotFound(shard_id))
}

/// Group member with PRIMARY status; shard maintenance runs there.
async fn group_primary(persister: &mut Persister, group_id: &str) -> Result<Server, Error> {
    let group = Group::require(persister, group_id).await?;
    let members = group.servers(persister).await?;
    members
        .into_iter()
        .find(|server| server.status == ServerStatus::Primary)
        .ok_or_else(|| Error::NoPrimary(group_id.into()))
}

/// Reinstall range-check triggers on the primaries of the given shards
/// with their current bounds.
async fn refresh_triggers(
    job: &mut JobContext<'_>,
    mapping: &ShardMapping,
    shard_ids: &[u32],
) -> Result<(), JobError> {
    let tables = ShardTable::of_mapping(job.persister, mapping.shard_mapping_id).await?;
    if tables.is_empty() {
        return Ok(());
    }

    for shard_id in shard_ids {
        let shard = Shard::require(job.persister, *shard_id).await?;
        let primary = match group_primary(job.persister, &shard.group_id).await {
            Ok(primary) => primary,
            Err(err) => {
                warn!(
                    "skipping trigger refresh on shard ({}): {}",
                    shard_id, err
                );
                continue;
            }
        };

        let (lower, upper) = match mapping.type_name {
            ShardingType::Hash => {
                let buckets =
                    HashBucket::list(job.persister, mapping.shard_mapping_id).await?;
                let mut sorted = buckets.clone();
                sorted.sort_by(|a, b| a.lower_bound.cmp(&b.lower_bound));
                let at = sorted
                    .iter()
                    .position(|bucket| bucket.shard_id == *shard_id)
                    .ok_or(Error::ShardNotFound(*shard_id))?;
                let upper = sorted.get(at + 1).map(|bucket| bucket.lower_bound.clone());
                (sorted[at].lower_bound.clone(), upper)
            }
            kind => {
                let rows = ShardRange::list(job.persister, mapping.shard_mapping_id).await?;
                let ranges = range::typed_ranges(&rows, kind)?;
                let (own, next) = range::bounds_of(&ranges, *shard_id)
                    .ok_or(Error::ShardNotFound(*shard_id))?;
                (own.raw_bound.clone(), next.map(|next| next.raw_bound.clone()))
            }
        };

        let mut conn = job.ctx.pool().get(&primary).await?;
        for table in &tables {
            triggers::install(
                &mut conn,
                mapping.type_name,
                &table.table_name,
                &table.column_name,
                &lower,
                upper.as_deref(),
            )
            .await?;
        }
    }
    Ok(())
}
