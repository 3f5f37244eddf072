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

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};

use super::{validate_count, validate_key, Lock, LockRoutine};
use crate::config::LockOptions;
use crate::errors::LockResult;
use crate::scripts::{
    MULTI_SEMAPHORE_ACQUIRE_SCRIPT, MULTI_SEMAPHORE_REFRESH_SCRIPT, MULTI_SEMAPHORE_RELEASE_SCRIPT,
};
use crate::util::{now_millis, num_milliseconds};

/// Semaphore variant where one holder takes several permits at once.
///
/// Shares the `semaphore:<key>` sorted set with [`Semaphore`], occupying one
/// member per permit, named `<identifier>_0` through `<identifier>_<n-1>`.
/// All permits are granted atomically or not at all, and they are refreshed
/// and released as one unit.
///
/// [`Semaphore`]: super::Semaphore
pub type MultiSemaphore<C = ConnectionManager> = Lock<MultiSemaphoreRoutine<C>>;

pub struct MultiSemaphoreRoutine<C> {
    connection: C,
    key: String,
    limit: u32,
    permits: u32,
    lock_timeout_ms: u64,
}

impl<C> MultiSemaphoreRoutine<C> {
    pub(crate) fn new(
        connection: C,
        key: &str,
        limit: u32,
        permits: u32,
        options: &LockOptions,
    ) -> Self {
        Self {
            connection,
            key: format!("semaphore:{key}"),
            limit,
            permits,
            lock_timeout_ms: num_milliseconds(&options.lock_timeout),
        }
    }
}

#[async_trait]
impl<C> LockRoutine for MultiSemaphoreRoutine<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        "multi-semaphore"
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn attempt(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let granted: i64 = MULTI_SEMAPHORE_ACQUIRE_SCRIPT
            .key(&self.key)
            .arg(self.limit)
            .arg(self.permits)
            .arg(identifier)
            .arg(self.lock_timeout_ms)
            .arg(now_millis())
            .invoke_async(&mut connection)
            .await?;
        Ok(granted == 1)
    }

    async fn refresh(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let refreshed: i64 = MULTI_SEMAPHORE_REFRESH_SCRIPT
            .key(&self.key)
            .arg(self.permits)
            .arg(identifier)
            .arg(self.lock_timeout_ms)
            .arg(now_millis())
            .invoke_async(&mut connection)
            .await?;
        Ok(refreshed == 1)
    }

    async fn release(&self, identifier: &str) -> LockResult<()> {
        let mut connection = self.connection.clone();
        let _: i64 = MULTI_SEMAPHORE_RELEASE_SCRIPT
            .key(&self.key)
            .arg(self.permits)
            .arg(identifier)
            .invoke_async(&mut connection)
            .await?;
        Ok(())
    }
}

impl<C> Lock<MultiSemaphoreRoutine<C>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a semaphore handle over `key` that takes `permits` of the
    /// `limit` available slots on every acquire.
    pub fn new(
        connection: C,
        key: impl Into<String>,
        limit: u32,
        permits: u32,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        validate_count("limit", limit)?;
        validate_count("permits", permits)?;
        Lock::with_routine(
            MultiSemaphoreRoutine::new(connection, &key, limit, permits, &options),
            options,
        )
    }
}
