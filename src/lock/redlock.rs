/*
 *
 *  *
 *  *      Copyright (c) 2018-2025, SnackCloud All rights reserved.
 *  *
 *  *   Redistribution and use in source and binary forms, with or without
 *  *   modification, are permitted provided that the following conditions are met:
 *  *
 *  *   Redistributions of source code must retain the above copyright notice,
 *  *   this list of conditions and the following disclaimer.
 *  *   Redistributions in binary form must reproduce the above copyright
 *  *   notice, this list of conditions and the following disclaimer in the
 *  *   documentation and/or other materials provided with the distribution.
 *  *   Neither the name of the www.snackcloud.cn developer nor the names of its
 *  *   contributors may be used to endorse or promote products derived from
 *  *   this software without specific prior written permission.
 *  *   Author: SnackCloud
 *  *
 *
 */

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use tracing::{debug, warn};

use super::{
    validate_count, validate_key, FairSemaphoreRoutine, Lock, LockRoutine, MultiSemaphoreRoutine,
    MutexRoutine, SemaphoreRoutine,
};
use crate::config::LockOptions;
use crate::errors::{LockError, LockResult};
use crate::util::calculate_quorum;

/// Mutex spread over several independent Redis nodes.
///
/// The lock counts as held while a majority of nodes carry the lease. Nodes
/// that are down or answer with errors merely count against the quorum, so
/// the lock survives a minority of failures without any coordination
/// between the nodes.
pub type RedlockMutex<C = ConnectionManager> = Lock<RedlockRoutine<MutexRoutine<C>>>;

/// [`Semaphore`](super::Semaphore) spread over several independent nodes.
pub type RedlockSemaphore<C = ConnectionManager> = Lock<RedlockRoutine<SemaphoreRoutine<C>>>;

/// [`MultiSemaphore`](super::MultiSemaphore) spread over several independent
/// nodes.
pub type RedlockMultiSemaphore<C = ConnectionManager> =
    Lock<RedlockRoutine<MultiSemaphoreRoutine<C>>>;

/// [`FairSemaphore`](super::FairSemaphore) spread over several independent
/// nodes. Every node runs its own ticket counter; admission needs a
/// majority of per-node grants.
pub type RedlockFairSemaphore<C = ConnectionManager> =
    Lock<RedlockRoutine<FairSemaphoreRoutine<C>>>;

/// Fans one single-node routine out over a node set and applies majority
/// voting to the answers.
pub struct RedlockRoutine<R: LockRoutine> {
    nodes: Vec<Arc<R>>,
    kind: String,
    key: String,
    quorum: usize,
}

impl<R: LockRoutine> std::fmt::Debug for RedlockRoutine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedlockRoutine")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("quorum", &self.quorum)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl<R: LockRoutine> RedlockRoutine<R> {
    pub(crate) fn new(nodes: Vec<R>) -> LockResult<Self> {
        let first = nodes
            .first()
            .ok_or_else(|| LockError::ConfigError("clients must be a non-empty list".into()))?;
        let kind = format!("redlock-{}", first.kind());
        let key = first.key().to_string();
        let quorum = calculate_quorum(nodes.len());
        Ok(Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
            kind,
            key,
            quorum,
        })
    }

    /// Runs `release` on every node, swallowing individual failures. A node
    /// that cannot be reached drops the lease by expiry instead.
    async fn release_all(&self, identifier: &str) {
        let mut handles = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let node = Arc::clone(node);
            let identifier = identifier.to_string();
            handles.push(tokio::spawn(async move {
                if let Err(err) = node.release(&identifier).await {
                    debug!("Redlock node {} release failed: {}", index, err);
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Best-effort re-acquire on nodes that fell out of the lease while the
    /// quorum as a whole held. Results are not waited on for the verdict;
    /// a node won back simply strengthens the next refresh round.
    async fn reacquire_nodes(&self, identifier: &str, indexes: &[usize]) {
        let mut handles = Vec::with_capacity(indexes.len());
        for &index in indexes {
            let node = Arc::clone(&self.nodes[index]);
            let identifier = identifier.to_string();
            handles.push(tokio::spawn(async move {
                if let Err(err) = node.attempt(&identifier).await {
                    debug!("Redlock node {} re-acquire failed: {}", index, err);
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl<R: LockRoutine> LockRoutine for RedlockRoutine<R> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn key(&self) -> &str {
        &self.key
    }

    /// One voting round: every node gets one attempt under the shared
    /// identifier. Short of a quorum the round is rolled back everywhere so
    /// no partial lease lingers until expiry.
    async fn attempt(&self, identifier: &str) -> LockResult<bool> {
        let mut handles = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let node = Arc::clone(node);
            let identifier = identifier.to_string();
            handles.push(tokio::spawn(async move {
                match node.attempt(&identifier).await {
                    Ok(granted) => granted,
                    Err(err) => {
                        warn!("Redlock node {} attempt failed: {}", index, err);
                        false
                    }
                }
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                granted += 1;
            }
        }

        debug!(
            "{} {} attempt granted on {}/{} nodes",
            self.kind,
            self.key,
            granted,
            self.nodes.len()
        );
        if granted >= self.quorum {
            return Ok(true);
        }
        self.release_all(identifier).await;
        Ok(false)
    }

    async fn refresh(&self, identifier: &str) -> LockResult<bool> {
        let mut handles = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let node = Arc::clone(node);
            let identifier = identifier.to_string();
            handles.push(tokio::spawn(async move {
                match node.refresh(&identifier).await {
                    Ok(refreshed) => refreshed,
                    Err(err) => {
                        warn!("Redlock node {} refresh failed: {}", index, err);
                        false
                    }
                }
            }));
        }

        let mut alive = 0;
        let mut lapsed = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(true) => alive += 1,
                _ => lapsed.push(index),
            }
        }

        if alive < self.quorum {
            debug!(
                "{} {} kept only {}/{} nodes, below quorum {}",
                self.kind,
                self.key,
                alive,
                self.nodes.len(),
                self.quorum
            );
            self.release_all(identifier).await;
            return Ok(false);
        }
        if !lapsed.is_empty() {
            self.reacquire_nodes(identifier, &lapsed).await;
        }
        Ok(true)
    }

    async fn release(&self, identifier: &str) -> LockResult<()> {
        self.release_all(identifier).await;
        Ok(())
    }
}

impl<C> Lock<RedlockRoutine<MutexRoutine<C>>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a mutex over `key` spanning one Redis node per connection.
    pub fn new(
        connections: Vec<C>,
        key: impl Into<String>,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        let nodes = connections
            .into_iter()
            .map(|connection| MutexRoutine::new(connection, &key, &options))
            .collect();
        Lock::with_routine(RedlockRoutine::new(nodes)?, options)
    }
}

impl<C> Lock<RedlockRoutine<SemaphoreRoutine<C>>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a semaphore over `key` spanning one Redis node per
    /// connection.
    pub fn new(
        connections: Vec<C>,
        key: impl Into<String>,
        limit: u32,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        validate_count("limit", limit)?;
        let nodes = connections
            .into_iter()
            .map(|connection| SemaphoreRoutine::new(connection, &key, limit, &options))
            .collect();
        Lock::with_routine(RedlockRoutine::new(nodes)?, options)
    }
}

impl<C> Lock<RedlockRoutine<MultiSemaphoreRoutine<C>>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a multi-permit semaphore over `key` spanning one Redis node
    /// per connection.
    pub fn new(
        connections: Vec<C>,
        key: impl Into<String>,
        limit: u32,
        permits: u32,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        validate_count("limit", limit)?;
        validate_count("permits", permits)?;
        let nodes = connections
            .into_iter()
            .map(|connection| {
                MultiSemaphoreRoutine::new(connection, &key, limit, permits, &options)
            })
            .collect();
        Lock::with_routine(RedlockRoutine::new(nodes)?, options)
    }
}

impl<C> Lock<RedlockRoutine<FairSemaphoreRoutine<C>>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a fair semaphore over `key` spanning one Redis node per
    /// connection.
    pub fn new(
        connections: Vec<C>,
        key: impl Into<String>,
        limit: u32,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        validate_count("limit", limit)?;
        let nodes = connections
            .into_iter()
            .map(|connection| FairSemaphoreRoutine::new(connection, &key, limit, &options))
            .collect();
        Lock::with_routine(RedlockRoutine::new(nodes)?, options)
    }
}
