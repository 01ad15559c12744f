use super::{BatchOp, CacheBackend};
use crate::CacheResult;
use redis::aio::ConnectionManager;
use redis::{Pipeline, Script};
use redis_utils::RedisPool;

/// Interprets an encoded batch: each op is `argc, command, args...`.
/// Plain commands are passed through; the conditional ones read before
/// writing, which MULTI/EXEC cannot do.
const BATCH_SCRIPT: &str = r#"
local i = 1
while i <= #ARGV do
  local argc = tonumber(ARGV[i])
  local cmd = ARGV[i + 1]
  if cmd == 'RPUSHMISSING' then
    local key, value = ARGV[i + 2], ARGV[i + 3]
    if not redis.call('LPOS', key, value) then
      redis.call('RPUSH', key, value)
    end
  elseif cmd == 'SEEDSET' then
    local key = ARGV[i + 2]
    if redis.call('EXISTS', key) == 0 then
      for j = i + 3, i + argc do
        redis.call('SADD', key, ARGV[j])
      end
    end
  elseif cmd == 'COUNTMEMBERS' then
    redis.call('SET', ARGV[i + 2], redis.call('SCARD', ARGV[i + 3]))
  else
    redis.call(unpack(ARGV, i + 1, i + argc))
  end
  i = i + argc + 1
end
return 1
"#;

/// Redis implementation of [`CacheBackend`].
///
/// Every call clones the pool's `ConnectionManager`; clones share one
/// multiplexed connection, so concurrent requests never wait on each other's
/// locks. While Redis is unreachable every call fails fast and the callers'
/// fail-soft paths take over.
#[derive(Clone)]
pub struct RedisBackend {
    pool: RedisPool,
}

impl RedisBackend {
    pub fn from_pool(pool: &RedisPool) -> Self {
        Self { pool: pool.clone() }
    }

    async fn conn(&self) -> CacheResult<ConnectionManager> {
        Ok(self.pool.manager().await?)
    }
}

fn push_op(pipe: &mut Pipeline, op: &BatchOp) {
    match op {
        BatchOp::LPush { key, value } => {
            pipe.cmd("LPUSH").arg(key).arg(value).ignore();
        }
        BatchOp::LTrim { key, start, stop } => {
            pipe.cmd("LTRIM").arg(key).arg(*start).arg(*stop).ignore();
        }
        BatchOp::LRem { key, value } => {
            pipe.cmd("LREM").arg(key).arg(0).arg(value).ignore();
        }
        BatchOp::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            pipe.cmd("SETEX").arg(key).arg(*ttl_secs).arg(value).ignore();
        }
        BatchOp::Del { key } => {
            pipe.cmd("DEL").arg(key).ignore();
        }
        BatchOp::SAdd { key, member } => {
            pipe.cmd("SADD").arg(key).arg(member).ignore();
        }
        BatchOp::SRem { key, member } => {
            pipe.cmd("SREM").arg(key).arg(member).ignore();
        }
        // Batches holding these take the script path
        BatchOp::RPushMissing { .. } | BatchOp::SeedSet { .. } | BatchOp::CountMembers { .. } => {}
    }
}

/// `None` when some op needs the script path
fn build_pipeline(ops: &[BatchOp], atomic: bool) -> Option<Pipeline> {
    if ops.iter().any(BatchOp::is_conditional) {
        return None;
    }
    let mut pipe = redis::pipe();
    if atomic {
        pipe.atomic();
    }
    for op in ops {
        push_op(&mut pipe, op);
    }
    Some(pipe)
}

/// Flatten one op into the `argc, command, args...` form the script reads
fn script_args(op: &BatchOp) -> Vec<String> {
    let mut args: Vec<String> = match op {
        BatchOp::LPush { key, value } => vec!["LPUSH".into(), key.clone(), value.clone()],
        BatchOp::RPushMissing { key, value } => {
            vec!["RPUSHMISSING".into(), key.clone(), value.clone()]
        }
        BatchOp::LTrim { key, start, stop } => {
            vec!["LTRIM".into(), key.clone(), start.to_string(), stop.to_string()]
        }
        BatchOp::LRem { key, value } => vec!["LREM".into(), key.clone(), "0".into(), value.clone()],
        BatchOp::SetEx {
            key,
            value,
            ttl_secs,
        } => vec!["SETEX".into(), key.clone(), ttl_secs.to_string(), value.clone()],
        BatchOp::Del { key } => vec!["DEL".into(), key.clone()],
        BatchOp::SAdd { key, member } => vec!["SADD".into(), key.clone(), member.clone()],
        BatchOp::SRem { key, member } => vec!["SREM".into(), key.clone(), member.clone()],
        BatchOp::SeedSet { key, members } => {
            let mut args = vec!["SEEDSET".to_string(), key.clone()];
            args.extend(members.iter().cloned());
            args
        }
        BatchOp::CountMembers { key, set } => vec!["COUNTMEMBERS".into(), key.clone(), set.clone()],
    };
    args.insert(0, args.len().to_string());
    args
}

impl RedisBackend {
    async fn run_script(&self, ops: &[BatchOp]) -> CacheResult<()> {
        let script = Script::new(BATCH_SCRIPT);
        let mut invocation = script.prepare_invoke();
        for op in ops {
            for arg in script_args(op) {
                invocation.arg(arg);
            }
        }
        invocation
            .invoke_async::<_, i64>(&mut self.conn().await?)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // Explicit MGET: the typed helper degrades to GET for a single key
        let values = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(values)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn().await?)
            .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let exists = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(exists)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let ids = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(ids)
    }

    async fn llen(&self, key: &str) -> CacheResult<usize> {
        let len = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(len)
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let count = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> CacheResult<()> {
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut self.conn().await?)
            .await?;
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let is_member = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(is_member)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        // SCAN instead of KEYS so a large keyspace never blocks the server
        let step = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn().await?)
            .await?;
        Ok(step)
    }

    async fn atomic(&self, ops: &[BatchOp]) -> CacheResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        match build_pipeline(ops, true) {
            Some(pipe) => {
                pipe.query_async::<_, ()>(&mut self.conn().await?).await?;
                Ok(())
            }
            None => self.run_script(ops).await,
        }
    }

    async fn pipeline(&self, ops: &[BatchOp]) -> CacheResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        match build_pipeline(ops, false) {
            Some(pipe) => {
                pipe.query_async::<_, ()>(&mut self.conn().await?).await?;
                Ok(())
            }
            None => self.run_script(ops).await,
        }
    }
}
