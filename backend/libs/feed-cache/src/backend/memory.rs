use super::{BatchOp, CacheBackend};
use crate::{CacheError, CacheResult};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// In-process [`CacheBackend`] with Redis semantics for the commands the feed
/// layer uses.
///
/// Expiry follows the tokio clock, so tests can drive TTLs with
/// `tokio::time::pause()` / `advance()`. Batches run under one lock and are
/// therefore indivisible. `set_available(false)` simulates a full outage.
pub struct MemoryBackend {
    state: Mutex<State>,
    available: AtomicBool,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    cursors: HashMap<u64, String>,
    next_cursor: u64,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remaining time to live, `None` when the key is missing or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock();
        let now = Instant::now();
        state
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Every live key, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.lock();
        let now = Instant::now();
        state.purge_expired(now);
        state.entries.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn guard(&self) -> CacheResult<std::sync::MutexGuard<'_, State>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "memory backend switched off".to_string(),
            ));
        }
        Ok(self.lock())
    }
}

impl State {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at.map(|at| at <= now).unwrap_or(false),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, e| e.expires_at.map(|at| at > now).unwrap_or(true));
    }

    fn list_mut(&mut self, key: &str, now: Instant, create: bool) -> CacheResult<Option<&mut VecDeque<String>>> {
        if self.live(key, now).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn set_mut(&mut self, key: &str, now: Instant, create: bool) -> CacheResult<Option<&mut BTreeSet<String>>> {
        if self.live(key, now).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(BTreeSet::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Set(set)) => Ok(Some(set)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    /// Redis drops empty aggregates
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::List(list)) => list.is_empty(),
            Some(Value::Set(set)) => set.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn incr_by(&mut self, key: &str, delta: i64, now: Instant) -> CacheResult<i64> {
        let (current, expires_at) = match self.live(key, now) {
            Some(Entry {
                value: Value::Str(raw),
                expires_at,
            }) => {
                let n = raw
                    .parse::<i64>()
                    .map_err(|_| CacheError::WrongType(key.to_string()))?;
                (n, *expires_at)
            }
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
            None => (0, None),
        };
        let next = current + delta;
        // INCR keeps an existing TTL
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + Duration::from_secs(ttl_secs)),
            },
        );
    }

    fn apply(&mut self, op: &BatchOp, now: Instant) -> CacheResult<()> {
        match op {
            BatchOp::LPush { key, value } => {
                if let Some(list) = self.list_mut(key, now, true)? {
                    list.push_front(value.clone());
                }
            }
            BatchOp::LTrim { key, start, stop } => {
                if let Some(list) = self.list_mut(key, now, false)? {
                    match normalize_range(list.len(), *start, *stop) {
                        Some((from, to)) => {
                            list.truncate(to + 1);
                            list.drain(..from);
                        }
                        None => list.clear(),
                    }
                    self.drop_if_empty(key);
                }
            }
            BatchOp::LRem { key, value } => {
                if let Some(list) = self.list_mut(key, now, false)? {
                    list.retain(|v| v != value);
                    self.drop_if_empty(key);
                }
            }
            BatchOp::SetEx {
                key,
                value,
                ttl_secs,
            } => self.set_ex(key, value, *ttl_secs, now),
            BatchOp::Del { key } => {
                self.entries.remove(key);
            }
            BatchOp::SAdd { key, member } => {
                if let Some(set) = self.set_mut(key, now, true)? {
                    set.insert(member.clone());
                }
            }
            BatchOp::SRem { key, member } => {
                if let Some(set) = self.set_mut(key, now, false)? {
                    set.remove(member);
                    self.drop_if_empty(key);
                }
            }
            BatchOp::RPushMissing { key, value } => {
                if let Some(list) = self.list_mut(key, now, true)? {
                    if !list.contains(value) {
                        list.push_back(value.clone());
                    }
                }
            }
            BatchOp::SeedSet { key, members } => {
                if self.live(key, now).is_none() && !members.is_empty() {
                    self.entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Set(members.iter().cloned().collect()),
                            expires_at: None,
                        },
                    );
                }
            }
            BatchOp::CountMembers { key, set } => {
                let n = self.set_mut(set, now, false)?.map(|s| s.len()).unwrap_or(0);
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(n.to_string()),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }
}

/// Redis LRANGE/LTRIM index rules. Returns inclusive bounds, `None` if empty.
fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as isize;
    let start = if start < 0 { (len_i + start).max(0) } else { start };
    let stop = if stop < 0 { len_i + stop } else { stop.min(len_i - 1) };
    if start > stop || start >= len_i || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Redis-style glob: `*`, `?`, `[...]` classes (with `^` and ranges) and `\` escapes.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => (0..=text.len()).any(|skip| glob_match(&pattern[1..], &text[skip..])),
        Some('?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some('[') => {
            let Some(&c) = text.first() else {
                return false;
            };
            let mut i = 1;
            let negate = pattern.get(i) == Some(&'^');
            if negate {
                i += 1;
            }
            let mut matched = false;
            while i < pattern.len() && pattern[i] != ']' {
                if pattern[i] == '\\' && i + 1 < pattern.len() {
                    matched |= pattern[i + 1] == c;
                    i += 2;
                } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
                    let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
                    matched |= lo <= c && c <= hi;
                    i += 3;
                } else {
                    matched |= pattern[i] == c;
                    i += 1;
                }
            }
            let rest = if i < pattern.len() { &pattern[i + 1..] } else { &pattern[i..] };
            matched != negate && glob_match(rest, &text[1..])
        }
        Some('\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_match(&pattern[2..], &text[1..])
        }
        Some(&p) => text.first() == Some(&p) && glob_match(&pattern[1..], &text[1..]),
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut state = self.guard()?;
        match state.live(key, Instant::now()) {
            Some(Entry {
                value: Value::Str(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut state = self.guard()?;
        let now = Instant::now();
        // MGET answers nil for keys holding a non-string value
        Ok(keys
            .iter()
            .map(|key| match state.live(key, now) {
                Some(Entry {
                    value: Value::Str(v),
                    ..
                }) => Some(v.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut state = self.guard()?;
        state.set_ex(key, value, ttl_secs, Instant::now());
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<usize> {
        let mut state = self.guard()?;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if state.live(key, now).is_some() {
                state.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut state = self.guard()?;
        Ok(state.live(key, Instant::now()).is_some())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let mut state = self.guard()?;
        let Some(list) = state.list_mut(key, Instant::now(), false)? else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn llen(&self, key: &str) -> CacheResult<usize> {
        let mut state = self.guard()?;
        Ok(state
            .list_mut(key, Instant::now(), false)?
            .map(|list| list.len())
            .unwrap_or(0))
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let mut state = self.guard()?;
        state.incr_by(key, 1, Instant::now())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut state = self.guard()?;
        let now = Instant::now();
        if let Some(entry) = state.live(key, now) {
            entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut state = self.guard()?;
        Ok(state
            .set_mut(key, Instant::now(), false)?
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let mut state = self.guard()?;
        state.purge_expired(Instant::now());

        // Cursors remember the last key examined, so deleting keys that were
        // already returned never makes the walk skip anything.
        let lower = if cursor == 0 {
            Bound::Unbounded
        } else {
            match state.cursors.remove(&cursor) {
                Some(last) => Bound::Excluded(last),
                None => return Ok((0, Vec::new())),
            }
        };

        let pattern: Vec<char> = pattern.chars().collect();
        let mut examined = 0;
        let mut last_examined = None;
        let mut keys = Vec::new();
        let mut exhausted = true;

        for key in state
            .entries
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(k, _)| k)
        {
            if examined == count.max(1) {
                exhausted = false;
                break;
            }
            examined += 1;
            let chars: Vec<char> = key.chars().collect();
            if glob_match(&pattern, &chars) {
                keys.push(key.clone());
            }
            last_examined = Some(key.clone());
        }

        if exhausted {
            return Ok((0, keys));
        }

        state.next_cursor += 1;
        let next = state.next_cursor;
        if let Some(last) = last_examined {
            state.cursors.insert(next, last);
        }
        Ok((next, keys))
    }

    async fn atomic(&self, ops: &[BatchOp]) -> CacheResult<()> {
        let mut state = self.guard()?;
        let now = Instant::now();
        // Like EXEC: a failing command does not stop the rest of the batch
        let mut first_error = None;
        for op in ops {
            if let Err(e) = state.apply(op, now) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
