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

use once_cell::sync::Lazy;
use redis::Script;

// Every primitive is a single atomic server-side procedure, so a
// check-then-act round trip can never interleave with another client.
// `redis::Script` submits by SHA1 and falls back to a full EVAL on NOSCRIPT.
// Timestamps in ARGV always come from the calling client's clock.

/// KEYS[1] = mutex key; ARGV = identifier, lock_timeout_ms.
pub static MUTEX_REFRESH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local identifier = ARGV[1]
        local lockTimeout = ARGV[2]

        if redis.call('get', key) == identifier then
            return redis.call('pexpire', key, lockTimeout)
        end
        return 0
    "#)
});

/// KEYS[1] = mutex key; ARGV = identifier. Deletes the key only for its holder.
pub static MUTEX_RELEASE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local identifier = ARGV[1]

        if redis.call('get', key) == identifier then
            return redis.call('del', key)
        end
        return 0
    "#)
});

/// KEYS[1] = semaphore key; ARGV = limit, identifier, lock_timeout_ms, now_ms.
pub static SEMAPHORE_ACQUIRE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local limit = tonumber(ARGV[1])
        local identifier = ARGV[2]
        local lockTimeout = tonumber(ARGV[3])
        local now = tonumber(ARGV[4])
        local expiredTimestamp = now - lockTimeout

        redis.call('zremrangebyscore', key, '-inf', expiredTimestamp)

        if redis.call('zcard', key) < limit then
            redis.call('zadd', key, now, identifier)
            redis.call('pexpire', key, lockTimeout)
            return 1
        else
            return 0
        end
    "#)
});

/// KEYS[1] = semaphore key; ARGV = identifier, lock_timeout_ms, now_ms.
pub static SEMAPHORE_REFRESH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local identifier = ARGV[1]
        local lockTimeout = ARGV[2]
        local now = ARGV[3]

        if redis.call('zscore', key, identifier) then
            redis.call('zadd', key, now, identifier)
            redis.call('pexpire', key, lockTimeout)
            return 1
        else
            return 0
        end
    "#)
});

/// KEYS[1] = semaphore key; ARGV = limit, permits, identifier,
/// lock_timeout_ms, now_ms. One holder occupies `permits` member slots named
/// `<identifier>_0 .. <identifier>_<permits-1>`, all at one timestamp.
pub static MULTI_SEMAPHORE_ACQUIRE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local limit = tonumber(ARGV[1])
        local permits = tonumber(ARGV[2])
        local identifier = ARGV[3]
        local lockTimeout = tonumber(ARGV[4])
        local now = tonumber(ARGV[5])
        local expiredTimestamp = now - lockTimeout
        local args = {}

        redis.call('zremrangebyscore', key, '-inf', expiredTimestamp)

        if (redis.call('zcard', key) + permits) <= limit then
            for i=0, permits - 1 do
                table.insert(args, now)
                table.insert(args, identifier .. '_' .. i)
            end
            redis.call('zadd', key, unpack(args))
            redis.call('pexpire', key, lockTimeout)
            return 1
        else
            return 0
        end
    "#)
});

/// KEYS[1] = semaphore key; ARGV = permits, identifier, lock_timeout_ms,
/// now_ms. Slot zero stands in for the whole acquisition.
pub static MULTI_SEMAPHORE_REFRESH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local permits = tonumber(ARGV[1])
        local identifier = ARGV[2]
        local lockTimeout = ARGV[3]
        local now = ARGV[4]
        local args = {}

        if redis.call('zscore', key, identifier .. '_0') then
            for i=0, permits - 1 do
                table.insert(args, now)
                table.insert(args, identifier .. '_' .. i)
            end
            redis.call('zadd', key, unpack(args))
            redis.call('pexpire', key, lockTimeout)
            return 1
        else
            return 0
        end
    "#)
});

/// KEYS[1] = semaphore key; ARGV = permits, identifier.
pub static MULTI_SEMAPHORE_RELEASE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local permits = tonumber(ARGV[1])
        local identifier = ARGV[2]
        local args = {}

        for i=0, permits - 1 do
            table.insert(args, identifier .. '_' .. i)
        end

        return redis.call('zrem', key, unpack(args))
    "#)
});

/// KEYS = semaphore key, owner key, counter key; ARGV = limit, identifier,
/// lock_timeout_ms, now_ms. The zinterstore drops tickets whose holders
/// expired out of the timestamp set; admission is by rank in the order set,
/// with the insert rolled back when the rank is past the limit.
pub static FAIR_SEMAPHORE_ACQUIRE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local keyOwner = KEYS[2]
        local keyCounter = KEYS[3]
        local limit = tonumber(ARGV[1])
        local identifier = ARGV[2]
        local lockTimeout = tonumber(ARGV[3])
        local now = tonumber(ARGV[4])
        local expiredTimestamp = now - lockTimeout
        local expireAt = now + lockTimeout

        redis.call('zremrangebyscore', key, '-inf', expiredTimestamp)
        redis.call('zinterstore', keyOwner, 2, keyOwner, key, 'WEIGHTS', 1, 0)
        local counter = redis.call('incr', keyCounter)
        redis.call('zadd', key, now, identifier)
        redis.call('zadd', keyOwner, counter, identifier)
        redis.call('pexpireat', key, expireAt)
        redis.call('pexpireat', keyOwner, expireAt)
        redis.call('pexpireat', keyCounter, expireAt)
        if redis.call('zrank', keyOwner, identifier) < limit then
            return 1
        else
            redis.call('zrem', key, identifier)
            redis.call('zrem', keyOwner, identifier)
            return 0
        end
    "#)
});

/// KEYS = semaphore key, owner key, counter key; ARGV = identifier,
/// lock_timeout_ms, now_ms. zadd reports the member as newly added exactly
/// when it had already expired out, which is the lost-lease signal; the
/// accidental re-add is undone before reporting.
pub static FAIR_SEMAPHORE_REFRESH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local keyOwner = KEYS[2]
        local keyCounter = KEYS[3]
        local identifier = ARGV[1]
        local lockTimeout = tonumber(ARGV[2])
        local now = tonumber(ARGV[3])

        local result = redis.call('zadd', key, now, identifier)

        redis.call('pexpire', key, lockTimeout)
        redis.call('pexpire', keyOwner, lockTimeout)
        redis.call('pexpire', keyCounter, lockTimeout)

        if result == 1 then
            redis.call('zrem', key, identifier)
            redis.call('zrem', keyOwner, identifier)
            return 0
        else
            return 1
        end
    "#)
});

/// KEYS = semaphore key, owner key; ARGV = identifier.
pub static FAIR_SEMAPHORE_RELEASE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(r#"
        local key = KEYS[1]
        local keyOwner = KEYS[2]
        local identifier = ARGV[1]

        local removed = redis.call('zrem', key, identifier)
        redis.call('zrem', keyOwner, identifier)
        return removed
    "#)
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_have_distinct_hashes() {
        let hashes = [
            MUTEX_REFRESH_SCRIPT.get_hash().to_string(),
            MUTEX_RELEASE_SCRIPT.get_hash().to_string(),
            SEMAPHORE_ACQUIRE_SCRIPT.get_hash().to_string(),
            SEMAPHORE_REFRESH_SCRIPT.get_hash().to_string(),
            MULTI_SEMAPHORE_ACQUIRE_SCRIPT.get_hash().to_string(),
            MULTI_SEMAPHORE_REFRESH_SCRIPT.get_hash().to_string(),
            MULTI_SEMAPHORE_RELEASE_SCRIPT.get_hash().to_string(),
            FAIR_SEMAPHORE_ACQUIRE_SCRIPT.get_hash().to_string(),
            FAIR_SEMAPHORE_REFRESH_SCRIPT.get_hash().to_string(),
            FAIR_SEMAPHORE_RELEASE_SCRIPT.get_hash().to_string(),
        ];
        for hash in &hashes {
            assert_eq!(hash.len(), 40, "expected a sha1 hex digest, got {hash}");
        }
        let mut unique = hashes.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), hashes.len());
    }
}
