//! Vendor event code table as the single source of truth for event code strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event codes reported by the pump/CGM vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    GlucoseReading,
    ManualGlucose,
    TempBasalProgram,
    BasalRate,
    BolusNormal,
    BolusSquare,
    BolusDual,
    CarbCorrection,
    Priming,
    Indication,
    ProfileSwitch,
    Note,
}

impl EventCode {
    /// Every code in the vendor table.
    pub const ALL: [Self; 12] = [
        Self::GlucoseReading,
        Self::ManualGlucose,
        Self::TempBasalProgram,
        Self::BasalRate,
        Self::BolusNormal,
        Self::BolusSquare,
        Self::BolusDual,
        Self::CarbCorrection,
        Self::Priming,
        Self::Indication,
        Self::ProfileSwitch,
        Self::Note,
    ];

    /// Canonical string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GlucoseReading => "glucose_reading",
            Self::ManualGlucose => "manual_glucose",
            Self::TempBasalProgram => "temp_basal",
            Self::BasalRate => "basal_rate",
            Self::BolusNormal => "bolus_normal",
            Self::BolusSquare => "bolus_square",
            Self::BolusDual => "bolus_dual",
            Self::CarbCorrection => "carb_correction",
            Self::Priming => "priming",
            Self::Indication => "indication",
            Self::ProfileSwitch => "profile_switch",
            Self::Note => "note",
        }
    }

    /// True for normal, square and dual boluses.
    pub const fn is_bolus(self) -> bool {
        matches!(self, Self::BolusNormal | Self::BolusSquare | Self::BolusDual)
    }

    /// True for the device/system indication family.
    ///
    /// The vendor reports profile activations as indications, so this
    /// includes [`EventCode::ProfileSwitch`].
    pub const fn is_indication(self) -> bool {
        matches!(self, Self::Indication | Self::ProfileSwitch)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventCode {
    type Err = UnknownEventCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "glucose_reading" | "egv" => Ok(Self::GlucoseReading),
            "manual_glucose" | "bg" => Ok(Self::ManualGlucose),
            "temp_basal" => Ok(Self::TempBasalProgram),
            "basal_rate" => Ok(Self::BasalRate),
            "bolus_normal" => Ok(Self::BolusNormal),
            "bolus_square" => Ok(Self::BolusSquare),
            "bolus_dual" => Ok(Self::BolusDual),
            "carb_correction" | "carbs" => Ok(Self::CarbCorrection),
            "priming" => Ok(Self::Priming),
            "indication" | "alarm" | "alert" => Ok(Self::Indication),
            "profile_switch" => Ok(Self::ProfileSwitch),
            "note" => Ok(Self::Note),
            _ => Err(UnknownEventCode(s.to_string())),
        }
    }
}

impl Serialize for EventCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown event code strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event code: {0}")]
pub struct UnknownEventCode(String);
