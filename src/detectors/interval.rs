use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::detectors::DetectorError;

/// Minimum elapsed time before a detector is retrained, e.g. `7d` or `1d12h`.
///
/// Zero means "never retrain".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrainingInterval {
    seconds: u64,
}

impl TrainingInterval {
    pub const ZERO: Self = Self { seconds: 0 };

    pub fn from_minutes(minutes: u64) -> Self {
        Self { seconds: minutes * 60 }
    }

    pub fn from_days(days: u64) -> Self {
        Self::from_minutes(days * 24 * 60)
    }

    pub fn as_minutes(&self) -> u64 {
        self.seconds / 60
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0
    }
}

impl Default for TrainingInterval {
    fn default() -> Self {
        Self::from_days(7)
    }
}

impl FromStr for TrainingInterval {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DetectorError::InvalidTrainingInterval(s.to_string());
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if compact.is_empty() {
            return Err(invalid());
        }
        if compact.chars().all(|c| c.is_ascii_digit()) {
            // bare number: only zero is unambiguous
            return match compact.parse::<u64>() {
                Ok(0) => Ok(Self::ZERO),
                _ => Err(invalid()),
            };
        }

        let mut seconds: u64 = 0;
        let mut digits = String::new();
        for c in compact.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let scale = match c {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return Err(invalid()),
            };
            let value: u64 = digits.parse().map_err(|_| invalid())?;
            seconds = value
                .checked_mul(scale)
                .and_then(|v| seconds.checked_add(v))
                .ok_or_else(invalid)?;
            digits.clear();
        }
        if !digits.is_empty() {
            return Err(invalid());
        }
        Ok(Self { seconds })
    }
}

impl fmt::Display for TrainingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0m");
        }
        let parts = [
            (self.seconds / 86_400, 'd'),
            ((self.seconds % 86_400) / 3_600, 'h'),
            ((self.seconds % 3_600) / 60, 'm'),
            (self.seconds % 60, 's'),
        ];
        for (value, unit) in parts {
            if value > 0 {
                write!(f, "{}{}", value, unit)?;
            }
        }
        Ok(())
    }
}

impl Serialize for TrainingInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TrainingInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
