// src/geo/mod.rs

//! IP geolocation for the `geo_*` transforms.
//!
//! Lookups go through [`GeoLookup`]; [`GeoCache`] remembers the most recent
//! answer. The mapper evaluates every target of one source field back to
//! back, so a city/region/country fan-out over the same IP costs a single
//! database lookup.

pub mod maxmind;

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

pub use maxmind::MaxMindLookup;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geo lookup for {ip} failed: {reason}")]
    Lookup { ip: Ipv4Addr, reason: String },
}

/// One named place (city, subdivision or country) from a city database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Place {
    pub geoname_id: Option<u32>,
    pub iso_code: Option<String>,
    /// Locale code → name.
    pub names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CityRecord {
    pub city: Option<Place>,
    pub subdivisions: Vec<Place>,
    pub country: Option<Place>,
}

pub trait GeoLookup {
    /// `Ok(None)` when the address is simply not in the database.
    fn lookup(&self, ip: Ipv4Addr) -> Result<Option<CityRecord>, GeoError>;
}

/// Knows no addresses. Used when no database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeo;

impl GeoLookup for NoGeo {
    fn lookup(&self, _ip: Ipv4Addr) -> Result<Option<CityRecord>, GeoError> {
        Ok(None)
    }
}

/// Single-slot memo over a [`GeoLookup`].
///
/// Only the last IP is remembered: asking for a different address replaces
/// the slot. Not shared between threads; pass it by `&mut` through the row
/// loop.
pub struct GeoCache {
    lookup: Box<dyn GeoLookup>,
    last_ip: Option<Ipv4Addr>,
    last: Option<CityRecord>,
    lookups: u64,
}

impl GeoCache {
    pub fn new(lookup: Box<dyn GeoLookup>) -> Self {
        Self {
            lookup,
            last_ip: None,
            last: None,
            lookups: 0,
        }
    }

    /// Record for `ip`, hitting the backend only when `ip` changed.
    ///
    /// A lookup error leaves the slot as it was.
    pub fn resolve(&mut self, ip: Ipv4Addr) -> Result<Option<&CityRecord>, GeoError> {
        if self.last_ip != Some(ip) {
            let found = self.lookup.lookup(ip)?;
            self.lookups += 1;
            if found.is_none() {
                debug!(%ip, "address not in geo database");
            }
            self.last_ip = Some(ip);
            self.last = found;
        }
        Ok(self.last.as_ref())
    }

    /// Number of backend lookups performed so far.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}

/// Which part of a [`CityRecord`] a geo transform extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoPart {
    City,
    Region,
    Country,
}

fn name_in(place: Option<&Place>, locale: &str) -> Value {
    place
        .and_then(|p| p.names.get(locale))
        .map_or(Value::Null, |n| Value::String(n.clone()))
}

impl GeoPart {
    /// Shape the cached result into a fact member.
    ///
    /// Missing result or missing subdivision gives `""`; missing ids and
    /// names give null members.
    pub fn extract(self, record: Option<&CityRecord>) -> Value {
        let Some(record) = record else {
            return Value::String(String::new());
        };
        match self {
            GeoPart::City => {
                let city = record.city.as_ref();
                json!({
                    "id": city.and_then(|c| c.geoname_id),
                    "title_en": name_in(city, "en"),
                    "title_ru": name_in(city, "ru"),
                })
            }
            GeoPart::Region => match record.subdivisions.first() {
                Some(region) => place_with_iso(Some(region)),
                None => Value::String(String::new()),
            },
            GeoPart::Country => place_with_iso(record.country.as_ref()),
        }
    }
}

fn place_with_iso(place: Option<&Place>) -> Value {
    json!({
        "id": place.and_then(|p| p.geoname_id),
        "iso_code": place.and_then(|p| p.iso_code.clone()),
        "title_en": name_in(place, "en"),
        "title_ru": name_in(place, "ru"),
    })
}
