// src/geo/maxmind.rs

use anyhow::{Context, Result};
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::info;

use super::{CityRecord, GeoError, GeoLookup, Place};

/// [`GeoLookup`] over a GeoIP2/GeoLite2 City `.mmdb` file, read into memory.
pub struct MaxMindLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLookup {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::open_readfile(path)
            .with_context(|| format!("opening geo database {}", path.display()))?;
        info!(
            path = %path.display(),
            db_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            "geo database loaded"
        );
        Ok(Self { reader })
    }
}

fn place(
    geoname_id: Option<u32>,
    iso_code: Option<&str>,
    names: Option<&BTreeMap<&str, &str>>,
) -> Place {
    Place {
        geoname_id,
        iso_code: iso_code.map(str::to_string),
        names: names
            .map(|m| m.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            .unwrap_or_default(),
    }
}

impl GeoLookup for MaxMindLookup {
    fn lookup(&self, ip: Ipv4Addr) -> Result<Option<CityRecord>, GeoError> {
        let city: geoip2::City = match self.reader.lookup(IpAddr::V4(ip)) {
            Ok(city) => city,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => {
                return Err(GeoError::Lookup {
                    ip,
                    reason: e.to_string(),
                })
            }
        };

        Ok(Some(CityRecord {
            city: city
                .city
                .as_ref()
                .map(|c| place(c.geoname_id, None, c.names.as_ref())),
            subdivisions: city
                .subdivisions
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|s| place(s.geoname_id, s.iso_code, s.names.as_ref()))
                .collect(),
            country: city
                .country
                .as_ref()
                .map(|c| place(c.geoname_id, c.iso_code, c.names.as_ref())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.mmdb");
        let err = MaxMindLookup::open(&path).err().unwrap();
        assert!(format!("{err:#}").contains("absent.mmdb"));
    }
}
