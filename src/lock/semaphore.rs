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
use crate::scripts::{SEMAPHORE_ACQUIRE_SCRIPT, SEMAPHORE_REFRESH_SCRIPT};
use crate::util::{now_millis, num_milliseconds};

/// Counting semaphore allowing up to `limit` concurrent holders.
///
/// Holders live in a sorted set under `semaphore:<key>`, scored by the
/// timestamp of their last acquire or refresh. Members older than one lock
/// timeout are purged before every admission check, so a crashed holder
/// frees its slot on its own. Timestamps come from each caller's clock.
pub type Semaphore<C = ConnectionManager> = Lock<SemaphoreRoutine<C>>;

pub struct SemaphoreRoutine<C> {
    connection: C,
    key: String,
    limit: u32,
    lock_timeout_ms: u64,
}

impl<C> SemaphoreRoutine<C> {
    pub(crate) fn new(connection: C, key: &str, limit: u32, options: &LockOptions) -> Self {
        Self {
            connection,
            key: format!("semaphore:{key}"),
            limit,
            lock_timeout_ms: num_milliseconds(&options.lock_timeout),
        }
    }
}

#[async_trait]
impl<C> LockRoutine for SemaphoreRoutine<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        "semaphore"
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn attempt(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let granted: i64 = SEMAPHORE_ACQUIRE_SCRIPT
            .key(&self.key)
            .arg(self.limit)
            .arg(identifier)
            .arg(self.lock_timeout_ms)
            .arg(now_millis())
            .invoke_async(&mut connection)
            .await?;
        Ok(granted == 1)
    }

    async fn refresh(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let refreshed: i64 = SEMAPHORE_REFRESH_SCRIPT
            .key(&self.key)
            .arg(identifier)
            .arg(self.lock_timeout_ms)
            .arg(now_millis())
            .invoke_async(&mut connection)
            .await?;
        Ok(refreshed == 1)
    }

    async fn release(&self, identifier: &str) -> LockResult<()> {
        let mut connection = self.connection.clone();
        let _: i64 = redis::cmd("ZREM")
            .arg(&self.key)
            .arg(identifier)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }
}

impl<C> Lock<SemaphoreRoutine<C>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a semaphore over `key` admitting at most `limit` holders.
    pub fn new(
        connection: C,
        key: impl Into<String>,
        limit: u32,
        options: LockOptions,
    ) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        validate_count("limit", limit)?;
        Lock::with_routine(
            SemaphoreRoutine::new(connection, &key, limit, &options),
            options,
        )
    }
}
