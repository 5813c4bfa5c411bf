use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize};

pub mod loader;
pub mod normalizer;
pub mod session;

pub use normalizer::{NormalizerConfig, normalize};
pub use session::{LapSummary, Session};

/// Scalar channels carried by a telemetry sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    Timestamp,
    Speed,
    Throttle,
    BrakePressureFront,
    SteeringAngle,
    Gear,
    Rpm,
    PositionX,
    PositionY,
    LongitudinalAccel,
    LateralAccel,
}

impl Channel {
    pub const ALL: [Channel; 11] = [
        Channel::Timestamp,
        Channel::Speed,
        Channel::Throttle,
        Channel::BrakePressureFront,
        Channel::SteeringAngle,
        Channel::Gear,
        Channel::Rpm,
        Channel::PositionX,
        Channel::PositionY,
        Channel::LongitudinalAccel,
        Channel::LateralAccel,
    ];

    /// Optional channels stay absent when a lap never recorded them; every
    /// other channel is zero-filled by the normalizer.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Channel::Timestamp | Channel::LongitudinalAccel | Channel::LateralAccel
        )
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Timestamp => write!(f, "timestamp"),
            Channel::Speed => write!(f, "speed"),
            Channel::Throttle => write!(f, "throttle"),
            Channel::BrakePressureFront => write!(f, "brakePressureFront"),
            Channel::SteeringAngle => write!(f, "steeringAngle"),
            Channel::Gear => write!(f, "gear"),
            Channel::Rpm => write!(f, "rpm"),
            Channel::PositionX => write!(f, "positionX"),
            Channel::PositionY => write!(f, "positionY"),
            Channel::LongitudinalAccel => write!(f, "longitudinalAccel"),
            Channel::LateralAccel => write!(f, "lateralAccel"),
        }
    }
}

/// One sample as read from a telemetry source, before normalization.
///
/// This is the ingestion schema: every naming variant seen in recorded data
/// is resolved here through serde aliases, so nothing downstream needs to
/// know about `ath` or `pbrake_f`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSample {
    #[serde(alias = "lap", alias = "Lap", alias = "lap_number", alias = "LapNumber")]
    pub lap_number: Option<u32>,
    #[serde(
        alias = "Distance",
        alias = "lap_distance",
        alias = "LapDistance",
        alias = "Laptrigger_lapdist_dls"
    )]
    pub distance: Option<f64>,
    #[serde(
        alias = "Timestamp",
        alias = "time",
        alias = "elapsed",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: Option<f64>,
    #[serde(alias = "Speed", alias = "SPEED", alias = "speed_kmh")]
    pub speed: Option<f64>,
    #[serde(alias = "ath", alias = "aps", alias = "Throttle")]
    pub throttle: Option<f64>,
    #[serde(
        alias = "pbrake_f",
        alias = "brake",
        alias = "Brake",
        alias = "brake_pressure_front"
    )]
    pub brake_pressure_front: Option<f64>,
    #[serde(
        alias = "Steering_Angle",
        alias = "SteeringAngle",
        alias = "steering",
        alias = "steering_angle"
    )]
    pub steering_angle: Option<f64>,
    #[serde(alias = "Gear")]
    pub gear: Option<f64>,
    #[serde(alias = "nmot", alias = "RPM", alias = "engine_rpm")]
    pub rpm: Option<f64>,
    #[serde(alias = "WorldPositionX", alias = "x", alias = "position_x")]
    pub position_x: Option<f64>,
    #[serde(alias = "WorldPositionY", alias = "y", alias = "position_y")]
    pub position_y: Option<f64>,
    #[serde(alias = "accx_can", alias = "longitudinal_accel")]
    pub longitudinal_accel: Option<f64>,
    #[serde(alias = "accy_can", alias = "lateral_accel")]
    pub lateral_accel: Option<f64>,
}

impl RawSample {
    pub fn channel(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Timestamp => self.timestamp,
            Channel::Speed => self.speed,
            Channel::Throttle => self.throttle,
            Channel::BrakePressureFront => self.brake_pressure_front,
            Channel::SteeringAngle => self.steering_angle,
            Channel::Gear => self.gear,
            Channel::Rpm => self.rpm,
            Channel::PositionX => self.position_x,
            Channel::PositionY => self.position_y,
            Channel::LongitudinalAccel => self.longitudinal_accel,
            Channel::LateralAccel => self.lateral_accel,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampValue {
    Seconds(f64),
    Text(String),
}

/// Accepts elapsed seconds or an RFC 3339 date-time.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<TimestampValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(TimestampValue::Seconds(seconds)) => Ok(Some(seconds)),
        Some(TimestampValue::Text(text)) => loader::parse_timestamp(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// One recorded instant on a normalized lap.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    /// Meters from the start/finish line
    pub distance: f64,
    /// Capture time in seconds, absent when the source carried none
    pub timestamp: Option<f64>,
    /// km/h
    pub speed: f64,
    /// 0-100 %
    pub throttle: f64,
    /// Device native unit, never converted
    pub brake_pressure_front: f64,
    /// Degrees, signed
    pub steering_angle: f64,
    pub gear: u32,
    pub rpm: f64,
    pub position_x: f64,
    pub position_y: f64,
    /// g
    pub longitudinal_accel: Option<f64>,
    /// g
    pub lateral_accel: Option<f64>,
}

impl TelemetrySample {
    pub fn channel(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Timestamp => self.timestamp,
            Channel::Speed => Some(self.speed),
            Channel::Throttle => Some(self.throttle),
            Channel::BrakePressureFront => Some(self.brake_pressure_front),
            Channel::SteeringAngle => Some(self.steering_angle),
            Channel::Gear => Some(self.gear as f64),
            Channel::Rpm => Some(self.rpm),
            Channel::PositionX => Some(self.position_x),
            Channel::PositionY => Some(self.position_y),
            Channel::LongitudinalAccel => self.longitudinal_accel,
            Channel::LateralAccel => self.lateral_accel,
        }
    }
}

/// A normalized lap: samples in strictly increasing distance order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub lap_number: u32,
    /// Total elapsed time in seconds
    pub lap_time: f64,
    pub samples: Vec<TelemetrySample>,
    /// Channels the source never recorded for this lap. Their values in
    /// `samples` are zero-filled placeholders.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub absent_channels: BTreeSet<Channel>,
}

impl Lap {
    /// Distance of the last sample, in meters
    pub fn distance(&self) -> f64 {
        self.samples.last().map(|s| s.distance).unwrap_or(0.0)
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        !self.absent_channels.contains(&channel)
    }

    /// Replaces the derived lap time with an externally timed one.
    pub fn with_lap_time(mut self, lap_time: f64) -> Self {
        self.lap_time = lap_time;
        self
    }

    /// Converts the lap back into ingestion samples. Channels recorded as
    /// absent come back as `None`, so normalizing the result reproduces this lap.
    pub fn to_raw(&self) -> Vec<RawSample> {
        let present = |channel: Channel, value: f64| self.has_channel(channel).then_some(value);
        self.samples
            .iter()
            .map(|s| RawSample {
                lap_number: Some(self.lap_number),
                distance: Some(s.distance),
                timestamp: s.timestamp,
                speed: present(Channel::Speed, s.speed),
                throttle: present(Channel::Throttle, s.throttle),
                brake_pressure_front: present(
                    Channel::BrakePressureFront,
                    s.brake_pressure_front,
                ),
                steering_angle: present(Channel::SteeringAngle, s.steering_angle),
                gear: present(Channel::Gear, s.gear as f64),
                rpm: present(Channel::Rpm, s.rpm),
                position_x: present(Channel::PositionX, s.position_x),
                position_y: present(Channel::PositionY, s.position_y),
                longitudinal_accel: s.longitudinal_accel,
                lateral_accel: s.lateral_accel,
            })
            .collect()
    }
}

/// Weather conditions for a session, provided by an external source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeatherConditions {
    /// Track surface temperature, °C
    #[serde(alias = "track_temp", alias = "TrackTemp", alias = "TRACK_TEMP")]
    pub track_temp: Option<f64>,
    /// Air temperature, °C
    #[serde(
        alias = "ambient_temp",
        alias = "AmbientTemp",
        alias = "AIR_TEMP",
        alias = "air_temp"
    )]
    pub ambient_temp: Option<f64>,
    /// Relative humidity, %
    #[serde(alias = "Humidity", alias = "HUMIDITY")]
    pub humidity: Option<f64>,
}
