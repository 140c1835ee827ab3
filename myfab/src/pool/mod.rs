//! Connection pool for managed servers.
//!
//! One idle list per server uuid plus a tracker of handles out on loan,
//! so `purge` can close idle connections and interrupt in-flight calls
//! when a server is marked faulty or removed.

pub mod error;
mod tracker;

pub use error::Error;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::server::{Server, ServerConnection};

use tracker::Tracker;

#[derive(Default)]
struct Inner {
    idle: HashMap<Uuid, Vec<ServerConnection>>,
    tracker: Tracker,
}

/// Pool of reusable, revocable connections to managed servers.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a validated connection to `server`: a pooled one when it
    /// passes liveness and identity checks, a fresh one otherwise.
    pub async fn get(&self, server: &Server) -> Result<Guard, Error> {
        loop {
            let candidate = { self.inner.lock().idle.get_mut(&server.uuid).and_then(Vec::pop) };
            let Some(mut connection) = candidate else {
                break;
            };

            // The pooled handle must have authenticated as the server's
            // configured user; stale handles from before a credential
            // change are discarded.
            if connection.user() != server.user {
                debug!(
                    "discarding pooled connection to ({}) with stale user `{}`",
                    server.uuid,
                    connection.user()
                );
                continue;
            }
            if !connection.is_alive().await {
                continue;
            }

            let ticket = {
                let mut inner = self.inner.lock();
                inner.tracker.take(server.uuid, connection.connection_id())
            };
            return Ok(Guard::new(self.clone(), server.uuid, ticket, connection));
        }

        let connection =
            ServerConnection::connect(&server.address, &server.user, &server.password).await?;
        let ticket = {
            let mut inner = self.inner.lock();
            inner.tracker.take(server.uuid, connection.connection_id())
        };
        Ok(Guard::new(self.clone(), server.uuid, ticket, connection))
    }

    /// Close every pooled connection of `server` and interrupt the ones
    /// out on loan.
    pub async fn purge(&self, server: &Server) -> Result<(), Error> {
        let (idle, loaned_ids) = {
            let mut inner = self.inner.lock();
            let idle = inner.idle.remove(&server.uuid).unwrap_or_default();
            let loaned_ids = inner.tracker.revoke_server(server.uuid);
            (idle, loaned_ids)
        };

        for connection in idle {
            connection.disconnect().await;
        }

        if loaned_ids.is_empty() {
            return Ok(());
        }

        // Interrupt in-flight calls with KILL CONNECTION issued over a
        // short-lived administrative connection. The server may already
        // be unreachable; that is fine, the loans stay revoked either
        // way and will be dropped at check-in.
        match ServerConnection::connect(&server.address, &server.user, &server.password).await {
            Ok(mut admin) => {
                for id in loaned_ids {
                    if let Err(err) = admin.query_drop(&format!("KILL CONNECTION {}", id)).await {
                        debug!("could not kill connection {} on ({}): {}", id, server.uuid, err);
                    }
                }
                admin.disconnect().await;
            }
            Err(err) => {
                warn!(
                    "cannot reach ({}) to interrupt {} in-flight call(s): {}",
                    server.uuid,
                    loaned_ids.len(),
                    err
                );
            }
        }
        Ok(())
    }

    /// Idle connections pooled for a server.
    pub fn size(&self, server: Uuid) -> usize {
        self.inner
            .lock()
            .idle
            .get(&server)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Handles currently out on loan for a server.
    pub fn tracked(&self, server: Uuid) -> usize {
        self.inner.lock().tracker.tracked(server)
    }

    fn check_in(&self, server: Uuid, ticket: u64, connection: ServerConnection) {
        let mut inner = self.inner.lock();
        match inner.tracker.check_in(ticket) {
            Some(loan) if !loan.revoked => {
                inner.idle.entry(server).or_default().push(connection);
            }
            // Revoked or untracked: drop the handle on the floor. The
            // connection closes in the background.
            _ => (),
        }
    }
}

/// A loaned connection. Returns itself to the pool on drop unless the
/// loan was revoked in the meantime.
pub struct Guard {
    manager: ConnectionManager,
    server: Uuid,
    ticket: u64,
    connection: Option<ServerConnection>,
}

impl Guard {
    fn new(
        manager: ConnectionManager,
        server: Uuid,
        ticket: u64,
        connection: ServerConnection,
    ) -> Self {
        Self {
            manager,
            server,
            ticket,
            connection: Some(connection),
        }
    }

    pub fn server(&self) -> Uuid {
        self.server
    }

    /// Drop the handle without pooling it.
    pub fn discard(mut self) {
        if let Some(connection) = self.connection.take() {
            drop(connection);
        }
        let mut inner = self.manager.inner.lock();
        inner.tracker.check_in(self.ticket);
    }
}

impl Deref for Guard {
    type Target = ServerConnection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("guard already discarded")
    }
}

impl DerefMut for Guard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().expect("guard already discarded")
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.manager.check_in(self.server, self.ticket, connection);
        }
    }
}
