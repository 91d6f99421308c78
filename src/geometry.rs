//! Geographic primitives: bounding boxes and great-circle distances.
//!
//! Everything in this crate works in WGS84 lon/lat degrees (EPSG:4326).

use crate::error::{FinderError, Result};

/// Mean Earth radius in meters, used for haversine distances.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Bounding box in WGS84 lon/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box without validation.
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Parse `"min_lon,min_lat,max_lon,max_lat"` as produced by CLI flags.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| FinderError::InvalidRegion(format!("cannot parse bbox '{s}'")))?;
        if parts.len() != 4 {
            return Err(FinderError::InvalidRegion(format!(
                "expected 4 comma-separated values, got {}",
                parts.len()
            )));
        }
        let bbox = Self::new(parts[0], parts[1], parts[2], parts[3]);
        bbox.validate()?;
        Ok(bbox)
    }

    /// Check that the box is well-formed and within WGS84 range.
    pub fn validate(&self) -> Result<()> {
        if !self.minx.is_finite() || !self.miny.is_finite()
            || !self.maxx.is_finite() || !self.maxy.is_finite()
        {
            return Err(FinderError::InvalidRegion("non-finite bounds".to_string()));
        }
        if self.minx >= self.maxx || self.miny >= self.maxy {
            return Err(FinderError::InvalidRegion(format!(
                "min >= max: ({}, {}, {}, {})",
                self.minx, self.miny, self.maxx, self.maxy
            )));
        }
        if self.minx < -180.0 || self.maxx > 180.0 || self.miny < -90.0 || self.maxy > 90.0 {
            return Err(FinderError::InvalidRegion(format!(
                "outside WGS84 range: ({}, {}, {}, {})",
                self.minx, self.miny, self.maxx, self.maxy
            )));
        }
        Ok(())
    }

    /// Width in degrees of longitude.
    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    /// Height in degrees of latitude.
    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// Whether a point lies inside the box (inclusive edges).
    #[inline]
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.minx && lon <= self.maxx && lat >= self.miny && lat <= self.maxy
    }
}

/// Check a lon/lat pair against the valid WGS84 range.
#[inline]
pub fn check_lonlat(lon: f64, lat: f64) -> Result<()> {
    if !lon.is_finite() || !lat.is_finite() || !(-180.0..=180.0).contains(&lon)
        || !(-90.0..=90.0).contains(&lat)
    {
        return Err(FinderError::InvalidCoordinate { lon, lat });
    }
    Ok(())
}

/// Great-circle distance between two lon/lat points, in meters.
#[must_use]
pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Degrees of longitude spanning `meters` at a given latitude.
#[must_use]
pub fn meters_to_lon_degrees(meters: f64, lat: f64) -> f64 {
    let circumference = 2.0 * std::f64::consts::PI * EARTH_RADIUS_M * lat.to_radians().cos();
    meters / circumference * 360.0
}

/// Degrees of latitude spanning `meters`.
#[must_use]
pub fn meters_to_lat_degrees(meters: f64) -> f64 {
    let circumference = 2.0 * std::f64::consts::PI * EARTH_RADIUS_M;
    meters / circumference * 360.0
}
