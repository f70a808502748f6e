//! Reference-data cache: TTL snapshots of routes, stations, and the
//! card blacklist.
//!
//! Each map sits behind its own reader/writer lock. Reads are
//! lock-free of the database on a warm cache; misses read through and
//! backfill. A background timer calls [`ReferenceCache::refresh_all`]
//! proactively. Never authoritative — always safe to rebuild.

use crate::error::EngineResult;
use crate::store::{FareStore, RouteRow, StationRow};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Snapshot<T> {
    data: T,
    refreshed_at: Option<Instant>,
}

impl<T> Snapshot<T> {
    fn fresh(&self, ttl: Duration) -> bool {
        self.refreshed_at.is_some_and(|t| t.elapsed() < ttl)
    }
}

#[derive(Default)]
struct StationMaps {
    by_id: HashMap<i64, StationRow>,
    /// station_code and name both resolve to the station id.
    token_index: HashMap<String, i64>,
}

impl StationMaps {
    fn insert(&mut self, station: StationRow) {
        self.token_index
            .insert(station.station_code.clone(), station.id);
        self.token_index.insert(station.name.clone(), station.id);
        self.by_id.insert(station.id, station);
    }
}

pub struct ReferenceCache {
    ttl: Duration,
    routes: RwLock<Snapshot<HashMap<i64, RouteRow>>>,
    stations: RwLock<Snapshot<StationMaps>>,
    blacklist: RwLock<Snapshot<HashMap<String, bool>>>,
}

impl ReferenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            routes: RwLock::new(Snapshot {
                data: HashMap::new(),
                refreshed_at: None,
            }),
            stations: RwLock::new(Snapshot {
                data: StationMaps::default(),
                refreshed_at: None,
            }),
            blacklist: RwLock::new(Snapshot {
                data: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    pub fn route(&self, store: &FareStore, route_id: i64) -> EngineResult<Option<RouteRow>> {
        {
            let guard = self.routes.read().unwrap_or_else(|e| e.into_inner());
            if guard.fresh(self.ttl) {
                if let Some(route) = guard.data.get(&route_id) {
                    return Ok(Some(route.clone()));
                }
            }
        }
        let Some(route) = store.get_route(route_id)? else {
            return Ok(None);
        };
        let mut guard = self.routes.write().unwrap_or_else(|e| e.into_inner());
        guard.data.insert(route_id, route.clone());
        guard.refreshed_at = Some(Instant::now());
        Ok(Some(route))
    }

    /// Resolve a free-text station token (code or name).
    pub fn station_by_token(
        &self,
        store: &FareStore,
        token: &str,
    ) -> EngineResult<Option<StationRow>> {
        {
            let guard = self.stations.read().unwrap_or_else(|e| e.into_inner());
            if guard.fresh(self.ttl) {
                if let Some(id) = guard.data.token_index.get(token) {
                    if let Some(station) = guard.data.by_id.get(id) {
                        return Ok(Some(station.clone()));
                    }
                }
            }
        }
        let Some(station) = store.find_station_by_token(token)? else {
            return Ok(None);
        };
        let mut guard = self.stations.write().unwrap_or_else(|e| e.into_inner());
        guard.data.insert(station.clone());
        guard.refreshed_at = Some(Instant::now());
        Ok(Some(station))
    }

    pub fn is_blacklisted(&self, store: &FareStore, card_id: &str) -> EngineResult<bool> {
        {
            let guard = self.blacklist.read().unwrap_or_else(|e| e.into_inner());
            if guard.fresh(self.ttl) {
                if let Some(flag) = guard.data.get(card_id) {
                    return Ok(*flag);
                }
            }
        }
        let flag = match store.find_card(card_id)? {
            Some(card) => card.status == "blocked" || card.status == "lost",
            None => false,
        };
        let mut guard = self.blacklist.write().unwrap_or_else(|e| e.into_inner());
        guard.data.insert(card_id.to_string(), flag);
        guard.refreshed_at = Some(Instant::now());
        Ok(flag)
    }

    /// Rebuild every snapshot from the database. Called by the refresh
    /// timer and at engine start.
    pub fn refresh_all(&self, store: &FareStore) -> EngineResult<()> {
        let routes = store.all_active_routes()?;
        let stations = store.all_stations()?;
        let blocked = store.blacklisted_card_ids()?;
        let now = Instant::now();

        {
            let mut guard = self.routes.write().unwrap_or_else(|e| e.into_inner());
            guard.data = routes.into_iter().map(|r| (r.id, r)).collect();
            guard.refreshed_at = Some(now);
        }
        {
            let mut guard = self.stations.write().unwrap_or_else(|e| e.into_inner());
            let mut maps = StationMaps::default();
            for station in stations {
                maps.insert(station);
            }
            guard.data = maps;
            guard.refreshed_at = Some(now);
        }
        {
            let mut guard = self.blacklist.write().unwrap_or_else(|e| e.into_inner());
            guard.data = blocked.into_iter().map(|id| (id, true)).collect();
            guard.refreshed_at = Some(now);
        }
        log::debug!("reference cache refreshed");
        Ok(())
    }
}
