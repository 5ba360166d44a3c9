//! # Stage: Redis-Backed Store
//!
//! ## Responsibility
//! Production [`KeyValueStore`] over a blocking `redis::Connection`. Each
//! trait method maps to a single Redis command, so counter increments inherit
//! Redis' atomicity.
//!
//! ## Guarantees
//! - Atomic: `INCR` / `HINCRBY` are used for every counter mutation
//! - Non-panicking: connection and IO failures map to `StoreUnavailable`,
//!   type/parse failures map to `Corrupt`
//!
//! ## NOT Responsible For
//! - Reconnecting or retrying (a failed call is reported immediately)
//! - Redis authentication / TLS (configure via the URL)

#![cfg(feature = "redis-backing")]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::KeyValueStore;
use crate::error::{Result, SplitError};

fn map_err(key: &str, e: redis::RedisError) -> SplitError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped()
    {
        SplitError::StoreUnavailable(e.to_string())
    } else {
        SplitError::corrupt(key, e.to_string())
    }
}

/// Write-through store on a single Redis connection.
///
/// The connection sits behind a `Mutex` because `redis::Connection` needs
/// `&mut self`; the lock is held for exactly one command.
pub struct RedisStore {
    conn: Mutex<redis::Connection>,
}

impl RedisStore {
    /// Open a connection to Redis at `url` and verify it with `PING`.
    pub fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| SplitError::Config(e.to_string()))?;
        let mut conn = client
            .get_connection()
            .map_err(|e| SplitError::StoreUnavailable(format!("Redis connection failed: {e}")))?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(|e| SplitError::StoreUnavailable(format!("Redis ping failed: {e}")))?;
        tracing::debug!(target: "splitkit::store", url = %url, "connected to redis");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, redis::Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn query<T: redis::FromRedisValue>(&self, key: &str, cmd: &redis::Cmd) -> Result<T> {
        cmd.query::<T>(&mut *self.conn()).map_err(|e| map_err(key, e))
    }
}

impl KeyValueStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(key, redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.query(key, redis::cmd("SET").arg(key).arg(value))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.query(key, redis::cmd("EXISTS").arg(key))
    }

    fn delete(&self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(keys[0], redis::cmd("DEL").arg(keys.to_vec()))
    }

    fn incr(&self, key: &str) -> Result<i64> {
        self.query(key, redis::cmd("INCR").arg(key))
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.query(key, redis::cmd("HGET").arg(key).arg(field))
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.query(key, redis::cmd("HSET").arg(key).arg(field).arg(value))
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        self.query(key, redis::cmd("HDEL").arg(key).arg(field))
    }

    fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        self.query(key, redis::cmd("HINCRBY").arg(key).arg(field).arg(by))
    }

    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.query(key, redis::cmd("HGETALL").arg(key))
    }

    fn list_push(&self, key: &str, value: &str) -> Result<()> {
        self.query(key, redis::cmd("RPUSH").arg(key).arg(value))
    }

    fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.query(key, redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
    }

    fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.query(key, redis::cmd("SADD").arg(key).arg(member))
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.query(key, redis::cmd("SREM").arg(key).arg(member))
    }

    fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        self.query(key, redis::cmd("SMEMBERS").arg(key))
    }
}
