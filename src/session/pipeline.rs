// src/session/pipeline.rs

use crate::error::RowError;
use crate::geo::GeoCache;
use crate::mapping::{MapOutcome, Mapper};
use crate::parse::{parser_for, LineParser, LogFormat};

/// Parser and mapper for one data type.
pub struct Pipeline {
    pub data_type: String,
    parser: Box<dyn LineParser>,
    mapper: Mapper,
}

impl Pipeline {
    pub fn new(data_type: impl Into<String>, format: LogFormat, mapper: Mapper) -> Self {
        let parser = parser_for(format, mapper.mandatory().to_vec());
        Self {
            data_type: data_type.into(),
            parser,
            mapper,
        }
    }

    pub fn format(&self) -> LogFormat {
        self.parser.format()
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn process_line(&self, line: &str, geo: &mut GeoCache) -> Result<MapOutcome, RowError> {
        let raw = self.parser.parse(line)?;
        self.mapper.map(&raw, geo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::NoGeo;
    use crate::mapping::{FanOutPolicy, SamplingSpec, SchemaRow};
    use anyhow::Result;

    #[test]
    fn pipeline_reports_its_parser_and_policies() -> Result<()> {
        let rows = [SchemaRow::new("cid", "cid", "int", true)];
        let mapper = Mapper::new(&rows, "cid:".parse::<SamplingSpec>()?, FanOutPolicy::FirstMatch)?;
        let pipeline = Pipeline::new("player_events", LogFormat::Tagged, mapper);

        assert_eq!(pipeline.format(), LogFormat::Tagged);
        assert_eq!(pipeline.mapper().fan_out(), FanOutPolicy::FirstMatch);
        assert_eq!(pipeline.mapper().sampling().to_string(), "cid:");

        let mut geo = GeoCache::new(Box::new(NoGeo));
        let outcome = pipeline.process_line("1|1.1.1.1|cid:7", &mut geo)?;
        assert!(matches!(outcome, MapOutcome::Fact(_)));
        assert!(pipeline.process_line("1|1.1.1.1|ev:x", &mut geo).is_err());
        Ok(())
    }
}
