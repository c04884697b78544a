// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Category lookup cache with a time-to-live.
//!
//! The clock is injected so expiry is testable; there is no ambient
//! global state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::Serialize;

use crate::engine::EngineResult;

pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
}

pub struct CategoryCache {
    ttl: Duration,
    clock: Box<dyn Clock>,
    entries: HashMap<i64, String>,
    loaded_at: Option<Instant>,
    stats: CacheStats,
}

impl CategoryCache {
    pub fn new(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        CategoryCache {
            ttl,
            clock,
            entries: HashMap::new(),
            loaded_at: None,
            stats: CacheStats::default(),
        }
    }

    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Box::new(SystemClock))
    }

    fn stale(&self) -> bool {
        match self.loaded_at {
            Some(at) => self.clock.now().duration_since(at) >= self.ttl,
            None => true,
        }
    }

    /// Category name by id, refreshing the whole map when the TTL lapsed.
    pub fn get(&mut self, conn: &Connection, id: i64) -> EngineResult<Option<String>> {
        if self.stale() {
            self.refresh(conn)?;
        }
        match self.entries.get(&id) {
            Some(name) => {
                self.stats.hits += 1;
                Ok(Some(name.clone()))
            }
            None => {
                self.stats.misses += 1;
                Ok(None)
            }
        }
    }

    pub fn refresh(&mut self, conn: &Connection) -> EngineResult<usize> {
        let mut stmt = conn.prepare("SELECT id, name FROM categories")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?;
        self.entries.clear();
        for row in rows {
            let (id, name) = row?;
            self.entries.insert(id, name);
        }
        self.loaded_at = Some(self.clock.now());
        self.stats.refreshes += 1;
        Ok(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeClock {
        now: Rc<Cell<Instant>>,
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    #[test]
    fn cache_refreshes_after_ttl() {
        let conn = crate::db::open_in_memory().unwrap();
        conn.execute("INSERT INTO categories(name) VALUES('Groceries')", [])
            .unwrap();
        let start = Instant::now();
        let now = Rc::new(Cell::new(start));
        let mut cache = CategoryCache::new(
            Duration::from_secs(60),
            Box::new(FakeClock { now: now.clone() }),
        );

        assert_eq!(cache.get(&conn, 1).unwrap().as_deref(), Some("Groceries"));
        conn.execute("UPDATE categories SET name='Food' WHERE id=1", [])
            .unwrap();
        // Within the TTL the stale name is served.
        assert_eq!(cache.get(&conn, 1).unwrap().as_deref(), Some("Groceries"));

        now.set(start + Duration::from_secs(61));
        assert_eq!(cache.get(&conn, 1).unwrap().as_deref(), Some("Food"));
        assert_eq!(cache.stats().refreshes, 2);
    }
}
