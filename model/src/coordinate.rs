use std::{fmt, mem, str::FromStr};

use geo::{HaversineDistance, Point};

use crate::{Error, Result};

/// A point in decimal degrees, always within the valid latitude/longitude range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(Error::InvalidCoordinate {
                latitude,
                longitude,
            });
        }

        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Clamps (never wraps) into range. Non-finite input collapses to 0.
    pub fn clamped(latitude: f64, longitude: f64) -> Self {
        let finite = |x: f64| if x.is_finite() { x } else { 0.0 };
        Self {
            latitude: finite(latitude).clamp(-90.0, 90.0),
            longitude: finite(longitude).clamp(-180.0, 180.0),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }

    /// Great-circle distance in metres.
    pub fn distance(&self, other: &Coordinate) -> f64 {
        self.point().haversine_distance(&other.point())
    }

    pub fn default_name(&self) -> String {
        format!("coord_{:.4}_{:.4}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Accepts `19.1738, -96.1342` or the DMS form Google Earth copies out,
/// `19°11'19"N 96°07'32"W`.
impl FromStr for Coordinate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains('°') {
            return parse_dms_pair(s);
        }

        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| Error::parse(format!("expected `lat, lon`: {s:?}")))?;
        let parse = |x: &str| {
            x.trim()
                .parse::<f64>()
                .map_err(|_| Error::parse(format!("not a decimal degree: {:?}", x.trim())))
        };
        Coordinate::new(parse(lat)?, parse(lon)?)
    }
}

#[derive(Debug, PartialEq)]
enum Axis {
    Latitude,
    Longitude,
}

fn parse_dms_pair(s: &str) -> Result<Coordinate> {
    // split after each hemisphere letter so `19° 11' 19" N` works as well
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        if c.is_whitespace() || c == ',' {
            continue;
        }
        current.push(c);
        if matches!(c.to_ascii_uppercase(), 'N' | 'S' | 'E' | 'W') {
            parts.push(mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        return Err(Error::parse(format!("missing hemisphere in {current:?}")));
    }

    let mut latitude = None;
    let mut longitude = None;
    for part in &parts {
        let (axis, value) = parse_dms(part)?;
        let slot = match axis {
            Axis::Latitude => &mut latitude,
            Axis::Longitude => &mut longitude,
        };
        if slot.replace(value).is_some() {
            return Err(Error::parse(format!("repeated {axis:?} in {s:?}")));
        }
    }

    match (latitude, longitude) {
        (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
        _ => Err(Error::parse(format!(
            "expected one latitude and one longitude: {s:?}"
        ))),
    }
}

fn parse_dms(s: &str) -> Result<(Axis, f64)> {
    let invalid = || Error::parse(format!("invalid DMS component: {s:?}"));

    let hemisphere = s.chars().last().ok_or_else(invalid)?;
    let body = &s[..s.len() - hemisphere.len_utf8()];
    let (axis, sign) = match hemisphere.to_ascii_uppercase() {
        'N' => (Axis::Latitude, 1.0),
        'S' => (Axis::Latitude, -1.0),
        'E' => (Axis::Longitude, 1.0),
        'W' => (Axis::Longitude, -1.0),
        _ => return Err(invalid()),
    };

    let (degrees, rest) = body.split_once('°').ok_or_else(invalid)?;
    let (minutes, seconds) = match rest.split_once(['\'', '′']) {
        Some((m, s)) => (m, s.trim_end_matches(['"', '″'])),
        None if rest.is_empty() => ("0", ""),
        None => return Err(invalid()),
    };
    let seconds = if seconds.is_empty() { "0" } else { seconds };

    let degrees: f64 = degrees.parse().map_err(|_| invalid())?;
    let minutes: f64 = minutes.parse().map_err(|_| invalid())?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if degrees < 0.0 || !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    Ok((axis, sign * (degrees + minutes / 60.0 + seconds / 3600.0)))
}
