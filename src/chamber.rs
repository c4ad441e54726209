//! Chamber/enclosure temperature discovery.
//!
//! Printers name their chamber sensor however the owner configured it, so the
//! probe matches a candidate list against the printer's object directory and
//! remembers whichever name answers first.

use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

use crate::config::constants;
use crate::numeric::first_number;
use crate::printer::PrinterApi;

const TEMPERATURE_ALIASES: &[&str] = &["temperature", "temp", "current_temperature", "value"];
const TARGET_ALIASES: &[&str] = &["target", "target_temp", "target_temperature"];

/// Chamber temperature in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChamberReading {
    pub current: f64,
    pub target: f64,
}

impl ChamberReading {
    /// Read a sensor object. Sensors without a target report their own temperature as target.
    pub fn from_object(object: &Value) -> Option<Self> {
        let current = first_number(object, TEMPERATURE_ALIASES)?;
        let target = first_number(object, TARGET_ALIASES).unwrap_or(current);
        Some(Self { current, target })
    }
}

/// Printer object names with the time they were fetched.
#[derive(Debug)]
pub struct ObjectDirectoryCache {
    objects: Vec<String>,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl Default for ObjectDirectoryCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(constants::OBJECT_DIRECTORY_TTL_MS))
    }
}

impl ObjectDirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            objects: Vec::new(),
            fetched_at: None,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|fetched| now.saturating_duration_since(fetched) < self.ttl)
    }

    /// Cached object names, refetched when older than the TTL.
    ///
    /// A failed refetch keeps the stale list and returns the error.
    pub fn get(&mut self, api: &dyn PrinterApi, now: Instant) -> Result<&[String]> {
        if !self.is_fresh(now) {
            self.objects = api.list_objects()?;
            self.fetched_at = Some(now);
            debug!("Object directory refreshed: {} objects", self.objects.len());
        }
        Ok(&self.objects)
    }
}

/// Where the probe stands on finding a chamber sensor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChamberState {
    #[default]
    Unknown,
    Resolved(String),
}

/// Finds and reads the chamber temperature sensor.
#[derive(Debug)]
pub struct ChamberProbe {
    candidates: Vec<String>,
    state: ChamberState,
    directory: ObjectDirectoryCache,
    /// When discovery last came up empty.
    last_miss: Option<Instant>,
}

impl ChamberProbe {
    pub fn new(candidates: Vec<String>) -> Self {
        Self::with_directory(candidates, ObjectDirectoryCache::default())
    }

    pub fn with_directory(candidates: Vec<String>, directory: ObjectDirectoryCache) -> Self {
        Self {
            candidates,
            state: ChamberState::Unknown,
            directory,
            last_miss: None,
        }
    }

    pub fn state(&self) -> &ChamberState {
        &self.state
    }

    pub fn resolved_name(&self) -> Option<&str> {
        match &self.state {
            ChamberState::Resolved(name) => Some(name),
            ChamberState::Unknown => None,
        }
    }

    /// Read the chamber temperature, discovering the sensor on first use.
    ///
    /// Any failure yields `None`. A discovery that found nothing is not
    /// repeated until the directory TTL has passed.
    pub fn read(&mut self, api: &dyn PrinterApi, now: Instant) -> Option<ChamberReading> {
        if let ChamberState::Resolved(name) = &self.state {
            return query_reading(api, name);
        }
        if self
            .last_miss
            .is_some_and(|at| now.saturating_duration_since(at) < self.directory.ttl())
        {
            return None;
        }

        if let Some(name) = self.match_directory(api, now) {
            info!("Chamber sensor found in object directory: '{}'", name);
            self.state = ChamberState::Resolved(name.clone());
            return query_reading(api, &name);
        }

        for candidate in &self.candidates {
            if let Some(reading) = query_reading(api, candidate) {
                info!("Chamber sensor found by direct probe: '{}'", candidate);
                self.state = ChamberState::Resolved(candidate.clone());
                return Some(reading);
            }
        }

        debug!("No chamber sensor among {} candidates", self.candidates.len());
        self.last_miss = Some(now);
        None
    }

    /// First directory entry matching a candidate, in candidate order.
    fn match_directory(&mut self, api: &dyn PrinterApi, now: Instant) -> Option<String> {
        let objects = match self.directory.get(api, now) {
            Ok(objects) => objects,
            Err(e) => {
                debug!("Object directory lookup failed: {}", e);
                return None;
            }
        };
        self.candidates.iter().find_map(|candidate| {
            objects
                .iter()
                .find(|object| object.eq_ignore_ascii_case(candidate))
                .cloned()
        })
    }
}

fn query_reading(api: &dyn PrinterApi, name: &str) -> Option<ChamberReading> {
    match api.query_object(name) {
        Ok(object) => ChamberReading::from_object(&object),
        Err(e) => {
            debug!("Chamber query for '{}' failed: {}", name, e);
            None
        }
    }
}
