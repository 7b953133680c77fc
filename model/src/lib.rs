use core::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

mod coordinate;
mod error;
mod record;
mod repository;
mod store;

pub use coordinate::Coordinate;
pub use error::{Error, Result};
pub use record::CoordinateRecord;
pub use repository::{JsonFile, Memory, Repository};
pub use store::{CoordinateStore, Counts};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    #[value(aliases = ["pos", "p", "pool"])]
    Positive,
    #[value(aliases = ["neg", "n", "no-pool", "no_pool"])]
    Negative,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_lowercase().as_str() {
            "positive" | "pos" | "p" | "pool" | "+" => Self::Positive,
            "negative" | "neg" | "n" | "no_pool" | "no-pool" | "-" => Self::Negative,
            _ => return Err(Error::Parse(format!("unknown label: {s:?}"))),
        })
    }
}

impl Label {
    /// Directory name images of this class are written to.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}
