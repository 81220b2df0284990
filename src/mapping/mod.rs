// src/mapping/mod.rs

//! Schema-driven mapping from raw fields to facts.

mod policy;

pub use policy::{FanOutPolicy, PolicyError, SamplingSpec};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::RowError;
use crate::geo::GeoCache;
use crate::parse::{RawFields, UNKNOWN_FIELD};
use crate::transform::Transform;

/// Cleaned output record for one line.
pub type Fact = Map<String, Value>;

/// Accumulator for `source:raw` pairs whose transform failed.
pub const ERR_LOG_BAD: &str = "err_log_bad";
/// Accumulator for source fields no mapping row knows about.
pub const ERR_LOG_UNKNOWN: &str = UNKNOWN_FIELD;

/// One row of the per-data-type mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRow {
    #[serde(rename = "from")]
    pub source_field: String,
    #[serde(rename = "to")]
    pub target_field: String,
    #[serde(rename = "type")]
    pub transform_kind: String,
    #[serde(default)]
    pub mandatory: bool,
}

impl SchemaRow {
    pub fn new(from: &str, to: &str, kind: &str, mandatory: bool) -> Self {
        Self {
            source_field: from.to_lowercase(),
            target_field: to.to_string(),
            transform_kind: kind.to_string(),
            mandatory,
        }
    }
}

/// A [`SchemaRow`] with its transform kind resolved.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Fact(Fact),
    /// Sampling filter rejected the row.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct Mapper {
    mappings: Vec<FieldMapping>,
    mandatory: Vec<String>,
    sampling: SamplingSpec,
    fan_out: FanOutPolicy,
}

fn accumulate(fact: &mut Fact, key: &str, note: &str) {
    match fact.get_mut(key) {
        Some(Value::String(s)) => {
            s.push('|');
            s.push_str(note);
        }
        _ => {
            fact.insert(key.to_string(), Value::String(note.to_string()));
        }
    }
}

impl Mapper {
    /// Resolve every transform kind up front; one unknown kind fails the
    /// whole table.
    pub fn new(rows: &[SchemaRow], sampling: SamplingSpec, fan_out: FanOutPolicy) -> Result<Self> {
        let mut mappings = Vec::with_capacity(rows.len());
        let mut mandatory: Vec<String> = Vec::new();

        for row in rows {
            let transform: Transform = row.transform_kind.parse().with_context(|| {
                format!(
                    "mapping `{}` -> `{}`",
                    row.source_field, row.target_field
                )
            })?;
            let source = row.source_field.to_lowercase();
            if row.mandatory && !mandatory.contains(&source) {
                mandatory.push(source.clone());
            }
            mappings.push(FieldMapping {
                source,
                target: row.target_field.clone(),
                transform,
            });
        }

        debug!(
            mappings = mappings.len(),
            mandatory = mandatory.len(),
            sampling = %sampling,
            fan_out = fan_out.as_str(),
            "mapper ready"
        );
        Ok(Self {
            mappings,
            mandatory,
            sampling,
            fan_out,
        })
    }

    /// Source fields every line must carry.
    pub fn mandatory(&self) -> &[String] {
        &self.mandatory
    }

    pub fn sampling(&self) -> &SamplingSpec {
        &self.sampling
    }

    pub fn fan_out(&self) -> FanOutPolicy {
        self.fan_out
    }

    /// Map one parsed line.
    ///
    /// Field-level failures never fail the row: they land in
    /// [`ERR_LOG_BAD`] / [`ERR_LOG_UNKNOWN`]. All targets of one source field
    /// are evaluated before the next field, which keeps [`GeoCache`] hits
    /// contiguous.
    pub fn map(&self, raw: &RawFields, geo: &mut GeoCache) -> Result<MapOutcome, RowError> {
        let mut fact = Fact::new();
        let mut sampling_seen = false;

        for (name, value) in raw.iter() {
            if name == self.sampling.field {
                sampling_seen = true;
                if !self.sampling.keeps(value) {
                    return Ok(MapOutcome::Dropped);
                }
            }

            let mut matched = false;
            for mapping in self.mappings.iter().filter(|m| m.source == name) {
                matched = true;
                match mapping.transform.apply(Value::String(value.to_string()), geo) {
                    Ok(cleaned) => {
                        fact.insert(mapping.target.clone(), cleaned);
                    }
                    Err(e) => {
                        warn!(field = name, value, error = %e, "field rejected");
                        accumulate(&mut fact, ERR_LOG_BAD, &format!("{name}:{value}"));
                    }
                }
                if self.fan_out == FanOutPolicy::FirstMatch {
                    break;
                }
            }

            if !matched {
                let note = if name == UNKNOWN_FIELD { value } else { name };
                accumulate(&mut fact, ERR_LOG_UNKNOWN, note);
            }
        }

        if !sampling_seen {
            return Err(RowError::SamplingFieldAbsent {
                field: self.sampling.field.clone(),
            });
        }
        Ok(MapOutcome::Fact(fact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{CityRecord, GeoError, GeoLookup, Place};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    struct Fixed;

    impl GeoLookup for Fixed {
        fn lookup(&self, _ip: Ipv4Addr) -> Result<Option<CityRecord>, GeoError> {
            let place = |id, iso: Option<&str>, en: &str| Place {
                geoname_id: Some(id),
                iso_code: iso.map(str::to_string),
                names: BTreeMap::from([("en".to_string(), en.to_string())]),
            };
            Ok(Some(CityRecord {
                city: Some(place(498817, None, "Saint Petersburg")),
                subdivisions: vec![place(536203, Some("SPE"), "St.-Petersburg")],
                country: Some(place(2017370, Some("RU"), "Russia")),
            }))
        }
    }

    fn geo() -> GeoCache {
        GeoCache::new(Box::new(Fixed))
    }

    fn raw(pairs: &[(&str, &str)]) -> RawFields {
        let mut f = RawFields::new();
        for (k, v) in pairs {
            f.insert(*k, *v);
        }
        f
    }

    fn mapper(rows: &[SchemaRow], sampling: &str, fan_out: FanOutPolicy) -> Mapper {
        Mapper::new(rows, sampling.parse().unwrap(), fan_out).unwrap()
    }

    fn fact(outcome: MapOutcome) -> Fact {
        match outcome {
            MapOutcome::Fact(f) => f,
            MapOutcome::Dropped => panic!("row was dropped"),
        }
    }

    #[test]
    fn sampling_field_must_be_present() {
        let rows = [SchemaRow::new("u", "user", "log", false)];
        let m = mapper(&rows, "cid:", FanOutPolicy::Continue);
        let err = m.map(&raw(&[("u", "1")]), &mut geo()).unwrap_err();
        assert_eq!(
            err,
            RowError::SamplingFieldAbsent {
                field: "cid".into()
            }
        );
    }

    #[test]
    fn sampling_prefix_drops_rows() {
        let rows = [SchemaRow::new("cid", "cid", "int", false)];
        let m = mapper(&rows, "cid:12", FanOutPolicy::Continue);
        assert_eq!(
            m.map(&raw(&[("cid", "999")]), &mut geo()).unwrap(),
            MapOutcome::Dropped
        );
        let f = fact(m.map(&raw(&[("cid", "123")]), &mut geo()).unwrap());
        assert_eq!(f["cid"], json!(123));
    }

    #[test]
    fn fan_out_policies() {
        let rows = [
            SchemaRow::new("ip", "city", "geo_city", false),
            SchemaRow::new("ip", "country", "geo_country", false),
        ];
        let line = raw(&[("ip", "46.38.48.106")]);

        let m = mapper(&rows, "ip", FanOutPolicy::Continue);
        let f = fact(m.map(&line, &mut geo()).unwrap());
        assert_eq!(f["city"]["title_en"], json!("Saint Petersburg"));
        assert_eq!(f["country"]["iso_code"], json!("RU"));

        let m = mapper(&rows, "ip", FanOutPolicy::FirstMatch);
        let f = fact(m.map(&line, &mut geo()).unwrap());
        assert!(f.contains_key("city"));
        assert!(!f.contains_key("country"));
    }

    #[test]
    fn fan_out_shares_one_lookup() {
        let rows = [
            SchemaRow::new("ip", "city", "geo_city", false),
            SchemaRow::new("ip", "region", "geo_region", false),
            SchemaRow::new("ip", "country", "geo_country", false),
        ];
        let m = mapper(&rows, "ip", FanOutPolicy::Continue);
        let mut cache = geo();
        m.map(&raw(&[("ip", "46.38.48.106")]), &mut cache).unwrap();
        assert_eq!(cache.lookups(), 1);
    }

    #[test]
    fn failures_and_unknowns_accumulate() {
        let rows = [
            SchemaRow::new("n", "n", "int", false),
            SchemaRow::new("m", "m", "int", false),
            SchemaRow::new("u", "u", "log", false),
        ];
        let m = mapper(&rows, "u", FanOutPolicy::Continue);
        let line = raw(&[
            ("u", "1"),
            ("n", "abc"),
            ("m", "x"),
            ("zz", "1"),
            (UNKNOWN_FIELD, "orphan|token"),
            ("yy", "2"),
        ]);
        let f = fact(m.map(&line, &mut geo()).unwrap());
        assert_eq!(f["u"], json!("1"));
        assert!(!f.contains_key("n"));
        assert_eq!(f[ERR_LOG_BAD], json!("n:abc|m:x"));
        assert_eq!(f[ERR_LOG_UNKNOWN], json!("zz|orphan|token|yy"));
    }

    #[test]
    fn unknown_kind_fails_the_table() {
        let rows = [SchemaRow::new("u", "u", "NoSuchField", false)];
        let err = Mapper::new(&rows, "u".parse().unwrap(), FanOutPolicy::Continue).unwrap_err();
        assert!(format!("{err:#}").contains("NoSuchField"));
    }

    #[test]
    fn mandatory_set_is_collected() {
        let rows = [
            SchemaRow::new("U", "user", "log", true),
            SchemaRow::new("u", "user_id", "int", true),
            SchemaRow::new("t", "t", "log", false),
        ];
        let m = mapper(&rows, "u", FanOutPolicy::Continue);
        assert_eq!(m.mandatory().to_vec(), vec!["u".to_string()]);
    }

    #[test]
    fn schema_rows_read_from_yaml() {
        let rows: Vec<SchemaRow> = serde_yaml::from_str(
            "- {from: ip, to: city, type: GeoIP2CityDBCityField}\n- {from: u, to: user, type: log_guid, mandatory: true}\n",
        )
        .unwrap();
        assert_eq!(rows[1], SchemaRow::new("u", "user", "log_guid", true));
        assert!(!rows[0].mandatory);
    }
}
