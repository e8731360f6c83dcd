//! Service configuration.
//!
//! Every section has a `Default` carrying the production constants and `with_*`
//! builders for tests. `ServiceConfig` can also be loaded from JSON; any field
//! left out keeps its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::pricing::FareSettings;

/// How notifications go out once candidates are ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Notify ring by ring, honouring per-ring delay and cap.
    #[default]
    RingEscalation,
    /// Notify every connected candidate at once. Only sensible for small fleets.
    NotifyAll,
}

/// What to do with drivers that have no historical stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsPolicy {
    /// Score them with [`ColdStartStats`].
    #[default]
    ColdStartDefaults,
    /// Leave them out of the dispatch pool until stats are seeded.
    RequireSeeded,
}

/// When the demand multiplier reaches the fare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurgeMode {
    /// Compute at request time, store on the trip, reuse when completion re-prices.
    #[default]
    LockAtRequest,
    /// Always price at 1.0.
    Disabled,
}

/// Score inputs used for drivers without a historical record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdStartStats {
    pub rating: f64,
    pub acceptance_rate: f64,
    pub minutes_online: f64,
}

impl Default for ColdStartStats {
    fn default() -> Self {
        Self {
            rating: 4.5,
            acceptance_rate: 0.8,
            minutes_online: 30.0,
        }
    }
}

/// One notification ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RingSpec {
    /// Inclusive upper bound on pickup distance; `None` for the outermost ring.
    pub max_distance_km: Option<f64>,
    /// Offset from dispatch start before this ring is notified.
    pub delay_ms: u64,
    /// Maximum number of drivers notified in this ring; `None` for unlimited.
    pub cap: Option<usize>,
}

impl RingSpec {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

pub fn default_rings() -> Vec<RingSpec> {
    vec![
        RingSpec {
            max_distance_km: Some(2.0),
            delay_ms: 0,
            cap: None,
        },
        RingSpec {
            max_distance_km: Some(5.0),
            delay_ms: 3_000,
            cap: Some(10),
        },
        RingSpec {
            max_distance_km: Some(15.0),
            delay_ms: 8_000,
            cap: Some(3),
        },
        RingSpec {
            max_distance_km: None,
            delay_ms: 15_000,
            cap: Some(1),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub stats_policy: StatsPolicy,
    pub cold_start: ColdStartStats,
    /// Ordered innermost first.
    pub rings: Vec<RingSpec>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            stats_policy: StatsPolicy::default(),
            cold_start: ColdStartStats::default(),
            rings: default_rings(),
        }
    }
}

impl DispatchConfig {
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_stats_policy(mut self, policy: StatsPolicy) -> Self {
        self.stats_policy = policy;
        self
    }

    pub fn with_cold_start(mut self, cold_start: ColdStartStats) -> Self {
        self.cold_start = cold_start;
        self
    }

    pub fn with_rings(mut self, rings: Vec<RingSpec>) -> Self {
        self.rings = rings;
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.rings.is_empty() {
            return Err(DispatchError::Validation("at least one ring is required".into()));
        }
        let last = self.rings.len() - 1;
        let mut previous: Option<&RingSpec> = None;
        for (index, ring) in self.rings.iter().enumerate() {
            match ring.max_distance_km {
                None if index != last => {
                    return Err(DispatchError::Validation(
                        "only the outermost ring may be unbounded".into(),
                    ))
                }
                Some(_) if index == last => {
                    return Err(DispatchError::Validation(
                        "the outermost ring must be unbounded".into(),
                    ))
                }
                _ => {}
            }
            if let Some(prev) = previous {
                if ring.delay_ms < prev.delay_ms {
                    return Err(DispatchError::Validation(
                        "ring delays must not decrease outward".into(),
                    ));
                }
                if let (Some(a), Some(b)) = (prev.max_distance_km, ring.max_distance_km) {
                    if b <= a {
                        return Err(DispatchError::Validation(
                            "ring distances must increase outward".into(),
                        ));
                    }
                }
            }
            if ring.cap == Some(0) {
                return Err(DispatchError::Validation("ring cap must be positive".into()));
            }
            previous = Some(ring);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Reports older than this drop out of the dispatch pool. `None` disables the check.
    pub stale_after_secs: Option<u64>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: Some(120),
        }
    }
}

impl LocationConfig {
    pub fn with_stale_after_secs(mut self, secs: Option<u64>) -> Self {
        self.stale_after_secs = secs;
        self
    }

    /// Staleness threshold, or `None` when disabled or too large to represent.
    pub fn stale_after(&self) -> Option<chrono::Duration> {
        self.stale_after_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        match self.stale_after_secs {
            Some(secs) if self.stale_after().is_none() => Err(DispatchError::Validation(format!(
                "stale_after_secs {secs} is out of range"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub fares: FareSettings,
    pub dispatch: DispatchConfig,
    pub location: LocationConfig,
    pub surge: SurgeMode,
}

impl ServiceConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, DispatchError> {
        let config: ServiceConfig = serde_json::from_str(raw)
            .map_err(|err| DispatchError::Validation(format!("invalid config: {err}")))?;
        config.dispatch.validate()?;
        config.location.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            DispatchError::Validation(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_fares(mut self, fares: FareSettings) -> Self {
        self.fares = fares;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_location(mut self, location: LocationConfig) -> Self {
        self.location = location;
        self
    }

    pub fn with_surge(mut self, surge: SurgeMode) -> Self {
        self.surge = surge;
        self
    }
}
