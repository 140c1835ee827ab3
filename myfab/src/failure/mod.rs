//! Failure detection.
//!
//! One background pinger per active group feeds misses into the error
//! log; threat reports from the outside land in the same log. When both
//! escalation thresholds are exceeded inside the sliding window, the
//! server is marked faulty and, if it was the primary, a failover is
//! priority-enqueued after breaking conflicting procedures.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error as ThisError;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use myfab_config::FailureTracking;

use crate::args::Args;
use crate::context::Context;
use crate::server::{ErrorLog, Group, Server, ServerMode, ServerStatus};
use crate::store::Persister;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{0}")]
    Server(#[from] crate::server::Error),

    #[error("events: {0}")]
    Events(#[from] crate::events::Error),
}

struct GroupWatch {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of per-group pinger tasks.
pub struct FailureDetector {
    watches: Mutex<HashMap<String, GroupWatch>>,
    config: FailureTracking,
}

impl FailureDetector {
    pub fn new(config: FailureTracking) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Watch every group marked active in the state store.
    pub async fn start(&self, ctx: &Context) -> Result<(), crate::server::Error> {
        if !self.config.enabled {
            info!("failure detection is disabled");
            return Ok(());
        }
        let mut persister = ctx.store().connect().await?;
        for group in Group::groups(&mut persister).await? {
            if group.active {
                self.watch(ctx, &group.group_id);
            }
        }
        Ok(())
    }

    /// Start a pinger for one group. Idempotent.
    pub fn watch(&self, ctx: &Context, group_id: &str) {
        if !self.config.enabled {
            return;
        }
        let Some(shared) = ctx.shared() else {
            debug!("context is shutting down; not watching ({})", group_id);
            return;
        };

        let mut watches = self.watches.lock();
        if watches.contains_key(group_id) {
            return;
        }

        let cancel = CancellationToken::new();
        let config = self.config.clone();
        let group = group_id.to_string();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run(shared, group, config, task_cancel).await;
        });

        info!("failure detector watching group ({})", group_id);
        watches.insert(group_id.to_string(), GroupWatch { cancel, handle });
    }

    /// Stop the pinger of one group.
    pub fn unwatch(&self, group_id: &str) {
        if let Some(watch) = self.watches.lock().remove(group_id) {
            watch.cancel.cancel();
            watch.handle.abort();
            info!("failure detector released group ({})", group_id);
        }
    }

    pub fn watching(&self, group_id: &str) -> bool {
        self.watches.lock().contains_key(group_id)
    }

    pub fn shutdown(&self) {
        let mut watches = self.watches.lock();
        for (_, watch) in watches.drain() {
            watch.cancel.cancel();
            watch.handle.abort();
        }
    }
}

impl Drop for FailureDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run(
    ctx: std::sync::Arc<Context>,
    group_id: String,
    config: FailureTracking,
    cancel: CancellationToken,
) {
    let reporter = format!("myfab.detector.{}", group_id);
    let mut ticks = interval(config.detection_interval_duration());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }

        let mut persister = match ctx.store().connect().await {
            Ok(persister) => persister,
            Err(err) => {
                warn!("detector ({}) cannot reach the state store: {}", group_id, err);
                continue;
            }
        };

        let group = match Group::fetch(&mut persister, &group_id).await {
            Ok(Some(group)) => group,
            Ok(None) => break,
            Err(err) => {
                warn!("detector ({}) failed to load the group: {}", group_id, err);
                continue;
            }
        };
        // Groups in maintenance (split catch-up) are not pinged.
        if !group.active {
            continue;
        }

        let members = match Server::in_group(&mut persister, &group_id).await {
            Ok(members) => members,
            Err(err) => {
                warn!("detector ({}) failed to load members: {}", group_id, err);
                continue;
            }
        };

        for server in members {
            if matches!(server.status, ServerStatus::Faulty | ServerStatus::Spare) {
                continue;
            }
            if ping(&ctx, &server, &config).await {
                continue;
            }

            debug!("detector ({}) missed server ({})", group_id, server.uuid);
            if let Err(err) =
                ErrorLog::add(&mut persister, server.uuid, &reporter, "ping failed").await
            {
                warn!("detector ({}) could not log a miss: {}", group_id, err);
                continue;
            }
            match ErrorLog::window(&mut persister, server.uuid, config.notification_interval)
                .await
            {
                Ok(window)
                    if window.exceeds(config.notifications, config.notification_clients) =>
                {
                    if let Err(err) = escalate(&ctx, &mut persister, &server).await {
                        warn!(
                            "detector ({}) failed to escalate ({}): {}",
                            group_id, server.uuid, err
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("detector ({}) could not read the error log: {}", group_id, err)
                }
            }
        }

        if let Err(err) = ErrorLog::prune(&mut persister, config.prune_time).await {
            debug!("detector ({}) prune failed: {}", group_id, err);
        }
    }

    debug!("detector ({}) stopped", group_id);
}

async fn ping(ctx: &Context, server: &Server, config: &FailureTracking) -> bool {
    let probe = async {
        match ctx.pool().get(server).await {
            Ok(mut conn) => conn.is_alive().await,
            Err(_) => false,
        }
    };
    timeout(config.detection_timeout_duration(), probe)
        .await
        .unwrap_or(false)
}

/// Mark a server faulty and, when it was the primary, fail the group
/// over with priority.
pub async fn escalate(
    ctx: &Context,
    persister: &mut Persister,
    server: &Server,
) -> Result<(), Error> {
    warn!("server ({}) is considered faulty", server.uuid);

    Server::update_role(
        persister,
        server.uuid,
        ServerMode::Offline,
        ServerStatus::Faulty,
    )
    .await?;
    if let Err(err) = ctx.pool().purge(server).await {
        warn!("could not purge connections of ({}): {}", server.uuid, err);
    }

    let Some(group_id) = &server.group_id else {
        return Ok(());
    };
    let group = Group::require(persister, group_id).await?;
    if group.master != Some(server.uuid) {
        return Ok(());
    }

    // The primary is gone: evict whoever holds the group's lock, then
    // jump the queue with a failover.
    let lockables: std::collections::BTreeSet<String> =
        [group_id.clone()].into_iter().collect();
    let broken = ctx.executor().scheduler().break_conflicts(&lockables);
    if !broken.is_empty() {
        warn!(
            "broke {} procedure(s) holding locks on ({})",
            broken.len(),
            group_id
        );
    }

    ctx.dispatcher()
        .trigger_priority(
            &crate::ha::GROUP_FAILOVER,
            lockables,
            Args::new().with(group_id.as_str()).with(server.uuid),
        )
        .await?;
    Ok(())
}
