use serde::{Deserialize, Serialize};

use crate::{Coordinate, Error, Label, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct CoordinateRecord {
    label: Label,
    name: String,
    latitude: f64,
    longitude: f64,
    processed: bool,
}

impl CoordinateRecord {
    pub fn new(label: Label, name: impl Into<String>, coordinate: Coordinate) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            label,
            name,
            latitude: coordinate.latitude(),
            longitude: coordinate.longitude(),
            processed: false,
        })
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinate(&self) -> Coordinate {
        // validated on construction and deserialization
        Coordinate::clamped(self.latitude, self.longitude)
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    pub(crate) fn set_processed(&mut self) {
        self.processed = true;
    }
}

// names double as file stems
fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidRecord("name is empty".to_string()));
    }
    if name != name.trim() {
        return Err(Error::InvalidRecord(format!(
            "name has surrounding whitespace: {name:?}"
        )));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) || name.contains(char::is_control)
    {
        return Err(Error::InvalidRecord(format!(
            "name can't be used as a file name: {name:?}"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct RawRecord {
    label: Label,
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    processed: bool,
}

impl TryFrom<RawRecord> for CoordinateRecord {
    type Error = Error;

    fn try_from(raw: RawRecord) -> Result<Self> {
        let mut record = Self::new(
            raw.label,
            raw.name,
            Coordinate::new(raw.latitude, raw.longitude)?,
        )?;
        record.processed = raw.processed;
        Ok(record)
    }
}
