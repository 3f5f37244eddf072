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
    FAIR_SEMAPHORE_ACQUIRE_SCRIPT, FAIR_SEMAPHORE_REFRESH_SCRIPT, FAIR_SEMAPHORE_RELEASE_SCRIPT,
};
use crate::util::{now_millis, num_milliseconds};

/// Counting semaphore that admits contenders in arrival order.
///
/// Next to the `semaphore:<key>` timestamp set it keeps an order set at
/// `semaphore:<key>:owner`, scored by tickets drawn from the
/// `semaphore:<key>:counter` key. An acquire is admitted only while its
/// ticket ranks within `limit`, so a later contender can never overtake an
/// earlier one that is still waiting.
///
/// Expiry of crashed holders is judged on the acquiring client's clock. A
/// live holder can therefore be evicted only by a client whose clock runs
/// more than one full lock timeout ahead of the holder's last refresh.
pub type FairSemaphore<C = ConnectionManager> = Lock<FairSemaphoreRoutine<C>>;

pub struct FairSemaphoreRoutine<C> {
    connection: C,
    key: String,
    owner_key: String,
    counter_key: String,
    limit: u32,
    lock_timeout_ms: u64,
}

impl<C> FairSemaphoreRoutine<C> {
    pub(crate) fn new(connection: C, key: &str, limit: u32, options: &LockOptions) -> Self {
        Self {
            connection,
            key: format!("semaphore:{key}"),
            owner_key: format!("semaphore:{key}:owner"),
            counter_key: format!("semaphore:{key}:counter"),
            limit,
            lock_timeout_ms: num_milliseconds(&options.lock_timeout),
        }
    }
}

#[async_trait]
impl<C> LockRoutine for FairSemaphoreRoutine<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        "fair-semaphore"
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn attempt(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let granted: i64 = FAIR_SEMAPHORE_ACQUIRE_SCRIPT
            .key(&self.key)
            .key(&self.owner_key)
            .key(&self.counter_key)
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
        let refreshed: i64 = FAIR_SEMAPHORE_REFRESH_SCRIPT
            .key(&self.key)
            .key(&self.owner_key)
            .key(&self.counter_key)
            .arg(identifier)
            .arg(self.lock_timeout_ms)
            .arg(now_millis())
            .invoke_async(&mut connection)
            .await?;
        Ok(refreshed == 1)
    }

    async fn release(&self, identifier: &str) -> LockResult<()> {
        let mut connection = self.connection.clone();
        let _: i64 = FAIR_SEMAPHORE_RELEASE_SCRIPT
            .key(&self.key)
            .key(&self.owner_key)
            .arg(identifier)
            .invoke_async(&mut connection)
            .await?;
        Ok(())
    }
}

impl<C> Lock<FairSemaphoreRoutine<C>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a fair semaphore over `key` admitting at most `limit`
    /// holders in ticket order.
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
            FairSemaphoreRoutine::new(connection, &key, limit, &options),
            options,
        )
    }
}
