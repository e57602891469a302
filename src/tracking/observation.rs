//! Observation profiles
//!
//! A profile turns a particle's distance to its predicted event into the
//! probability `p(d) ∈ [0, 1]` that the current frame (or beat) is that
//! event. The observation likelihood mixes it with the network evidence `a`:
//!
//! ```text
//! L = p(d) · a + (1 - p(d)) · (1 - a)
//! ```
//!
//! so a particle sitting on its event is rewarded by high evidence and a
//! particle far from it by low evidence.

use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;

/// Shape of the event-proximity curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservationProfile {
    /// Linear fall-off reaching zero at `width`
    Triangular {
        /// Support radius (frames for beats, beats for downbeats)
        width: f32,
    },
    /// `exp(-d² / 2σ²)`
    Gaussian {
        /// Standard deviation
        sigma: f32,
    },
    /// 1 inside `width`, 0 outside
    Rectangular {
        /// Support radius
        width: f32,
    },
}

impl Default for ObservationProfile {
    fn default() -> Self {
        ObservationProfile::Triangular { width: 1.0 }
    }
}

impl ObservationProfile {
    /// Peak probability at distance `distance >= 0`
    #[inline]
    pub fn peak(&self, distance: f32) -> f32 {
        match *self {
            ObservationProfile::Triangular { width } => (1.0 - distance / width).max(0.0),
            ObservationProfile::Gaussian { sigma } => (-(distance * distance) / (2.0 * sigma * sigma)).exp(),
            ObservationProfile::Rectangular { width } => {
                if distance < width {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Likelihood of evidence `evidence` for a particle `distance` away
    #[inline]
    pub fn likelihood(&self, distance: f32, evidence: f32) -> f32 {
        let p = self.peak(distance);
        p * evidence + (1.0 - p) * (1.0 - evidence)
    }
}

impl FromStr for ObservationProfile {
    type Err = TrackerError;

    /// Parse a profile name
    ///
    /// Accepts the reference name `B56` (a unit-width triangle) and
    /// `triangular:<width>`, `gaussian:<sigma>`, `rectangular:<width>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.eq_ignore_ascii_case("b56") {
            return Ok(ObservationProfile::Triangular { width: 1.0 });
        }

        let unknown = || TrackerError::InvalidConfig(format!("unknown observation profile '{}'", s));
        let (kind, value) = name.split_once(':').ok_or_else(unknown)?;
        let value: f32 = value.trim().parse().map_err(|_| unknown())?;
        if !(value > 0.0 && value.is_finite()) {
            return Err(TrackerError::InvalidConfig(format!(
                "observation profile '{}' needs a positive parameter",
                s
            )));
        }

        match kind.trim().to_ascii_lowercase().as_str() {
            "triangular" => Ok(ObservationProfile::Triangular { width: value }),
            "gaussian" => Ok(ObservationProfile::Gaussian { sigma: value }),
            "rectangular" => Ok(ObservationProfile::Rectangular { width: value }),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for ObservationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationProfile::Triangular { width } => write!(f, "triangular:{}", width),
            ObservationProfile::Gaussian { sigma } => write!(f, "gaussian:{}", sigma),
            ObservationProfile::Rectangular { width } => write!(f, "rectangular:{}", width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_name() {
        let profile: ObservationProfile = "B56".parse().unwrap();
        assert_eq!(profile, ObservationProfile::Triangular { width: 1.0 });
        assert_eq!(profile, ObservationProfile::default());
    }

    #[test]
    fn test_parse_named_profiles() {
        assert_eq!(
            "gaussian:0.75".parse::<ObservationProfile>().unwrap(),
            ObservationProfile::Gaussian { sigma: 0.75 }
        );
        assert_eq!(
            "Rectangular: 2".parse::<ObservationProfile>().unwrap(),
            ObservationProfile::Rectangular { width: 2.0 }
        );
        let p = ObservationProfile::Triangular { width: 1.5 };
        assert_eq!(p.to_string().parse::<ObservationProfile>().unwrap(), p);
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["B57", "", "gaussian", "gaussian:-1", "cosine:1", "triangular:nan"] {
            assert!(
                matches!(name.parse::<ObservationProfile>(), Err(TrackerError::InvalidConfig(_))),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_peak_shapes() {
        let tri = ObservationProfile::Triangular { width: 1.0 };
        assert_eq!(tri.peak(0.0), 1.0);
        assert!((tri.peak(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(tri.peak(3.0), 0.0);

        let rect = ObservationProfile::Rectangular { width: 1.0 };
        assert_eq!(rect.peak(0.99), 1.0);
        assert_eq!(rect.peak(1.0), 0.0);

        let gauss = ObservationProfile::Gaussian { sigma: 1.0 };
        assert!((gauss.peak(1.0) - (-0.5f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_likelihood_mixes_evidence() {
        let tri = ObservationProfile::default();
        // On the event: likelihood equals the evidence
        assert!((tri.likelihood(0.0, 0.9) - 0.9).abs() < 1e-6);
        // Far from it: likelihood equals the complement
        assert!((tri.likelihood(5.0, 0.9) - 0.1).abs() < 1e-6);
    }
}
