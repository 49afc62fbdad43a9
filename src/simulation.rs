//! Driver simulator producing speed updates for a fixed set of segments.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::segment::SegmentSpeed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: &'static str,
    pub start_junction_id: &'static str,
    pub end_junction_id: &'static str,
    pub osm_way_id: &'static str,
    pub osm_start_node_id: &'static str,
    pub osm_end_node_id: &'static str,
    pub driver_id: &'static str,
}

pub static SEGMENTS: [Segment; 3] = [
    Segment {
        name: "segment1",
        start_junction_id: "junction1",
        end_junction_id: "junction2",
        osm_way_id: "way1",
        osm_start_node_id: "node1",
        osm_end_node_id: "node2",
        driver_id: "driver1",
    },
    Segment {
        name: "segment2",
        start_junction_id: "junction2",
        end_junction_id: "junction3",
        osm_way_id: "way2",
        osm_start_node_id: "node2",
        osm_end_node_id: "node3",
        driver_id: "driver2",
    },
    Segment {
        name: "segment3",
        start_junction_id: "junction3",
        end_junction_id: "junction4",
        osm_way_id: "way3",
        osm_start_node_id: "node3",
        osm_end_node_id: "node4",
        driver_id: "driver3",
    },
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverSpeed {
    pub speed_mph: f64,
    pub speed_variation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedUpdate {
    pub segment: Segment,
    pub speed_mph: f64,
    /// Variation after this tick's drift
    pub speed_variation: f64,
}

impl SpeedUpdate {
    /// Record for the stream, stamped with `at`
    pub fn to_segment_speed(&self, at: DateTime<Utc>) -> SegmentSpeed {
        SegmentSpeed {
            id: String::new(),
            year: at.year(),
            month: at.month() as i32,
            day: at.day() as i32,
            hour: at.hour() as i32,
            utc_timestamp: at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            start_junction_id: self.segment.start_junction_id.to_string(),
            end_junction_id: self.segment.end_junction_id.to_string(),
            osm_way_id: numeric_suffix(self.segment.osm_way_id),
            osm_start_node_id: numeric_suffix(self.segment.osm_start_node_id),
            osm_end_node_id: numeric_suffix(self.segment.osm_end_node_id),
            speed_mph_mean: self.speed_mph as f32,
            speed_mph_stddev: self.speed_variation as f32,
        }
        .with_derived_id()
    }
}

/// Trailing digits of an identifier such as `way12`, or 0
fn numeric_suffix(id: &str) -> i64 {
    let digits = id.trim_start_matches(|c: char| !c.is_ascii_digit());
    digits.parse().unwrap_or(0)
}

pub struct Simulator {
    drivers: BTreeMap<&'static str, DriverSpeed>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let driver = |speed_mph, speed_variation| DriverSpeed {
            speed_mph,
            speed_variation,
        };
        Self {
            drivers: BTreeMap::from([
                ("driver1", driver(45.0, 5.0)),
                ("driver2", driver(50.0, 3.0)),
                ("driver3", driver(55.0, 4.0)),
            ]),
        }
    }

    pub fn driver(&self, id: &str) -> Option<&DriverSpeed> {
        self.drivers.get(id)
    }

    /// Speed for one segment; None if the segment or its driver is unknown.
    /// The driver's variation drifts by ×U(0.9, 1.1) on every call.
    pub fn speed_for<R: Rng>(&mut self, segment: &str, rng: &mut R) -> Option<SpeedUpdate> {
        let segment = SEGMENTS.iter().find(|s| s.name == segment)?;
        let driver = self.drivers.get_mut(segment.driver_id)?;

        let speed_mph = driver.speed_mph + rng.gen_range(-1.0..=1.0) * driver.speed_variation;
        driver.speed_variation *= rng.gen_range(0.9..=1.1);

        Some(SpeedUpdate {
            segment: segment.clone(),
            speed_mph,
            speed_variation: driver.speed_variation,
        })
    }

    /// One update per segment
    pub fn tick<R: Rng>(&mut self, rng: &mut R) -> Vec<SpeedUpdate> {
        SEGMENTS
            .iter()
            .filter_map(|segment| self.speed_for(segment.name, rng))
            .collect()
    }
}

/// Longest accepted tick interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse the tick interval; only positive, finite seconds up to
/// [`MAX_INTERVAL`] are accepted
pub fn parse_interval(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        bail!("invalid time interval {}: enter a positive number", secs);
    }
    let interval = Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("invalid time interval {}: {}", secs, e))?;
    if interval > MAX_INTERVAL {
        bail!(
            "invalid time interval {}: at most {} seconds",
            secs,
            MAX_INTERVAL.as_secs()
        );
    }
    Ok(interval)
}
