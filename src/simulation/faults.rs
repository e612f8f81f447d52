//! # Fault & Maintenance State Machine
//!
//! Per-site stochastic process: `Normal`, `Faulted` or `Maintenance`.
//!
//! The transition function is pure. All randomness for a tick is drawn up
//! front into a [`TransitionDraw`], so a seeded generator replays exactly
//! and tests can hand-craft draws.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::{ActiveFault, ClearReason, FaultKind, FaultSeverity, MaintenanceWindow};

/// One entry of the fault distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultWeight {
    pub kind: FaultKind,
    pub severity: FaultSeverity,
    pub weight: f64,
}

/// Tunable coefficients of the fault/maintenance process.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_fault_params"))]
pub struct FaultParams {
    /// Per-tick probability that a critical fault triggers a repair crew
    #[validate(range(min = 0.0, max = 1.0))]
    pub repair_dispatch_probability: f64,
    /// Base per-tick probability that a non-critical fault clears
    #[validate(range(min = 0.0, max = 1.0))]
    pub base_clear_probability: f64,
    /// Increase of the clear probability per hour of fault age
    #[validate(range(min = 0.0))]
    pub clear_probability_per_hour: f64,
    /// Non-critical faults always clear after this many seconds
    #[validate(range(min = 1))]
    pub max_fault_duration_seconds: i64,
    #[validate(range(min = 1))]
    pub min_maintenance_seconds: i64,
    #[validate(range(min = 1))]
    pub max_maintenance_seconds: i64,
    /// Upper bound of failed strings for a string failure
    #[validate(range(min = 1))]
    pub max_failed_strings: u32,
    pub distribution: Vec<FaultWeight>,
}

fn validate_fault_params(p: &FaultParams) -> Result<(), ValidationError> {
    if p.min_maintenance_seconds > p.max_maintenance_seconds {
        return Err(ValidationError::new("maintenance_duration_range"));
    }
    if p.distribution.is_empty()
        || p.distribution.iter().any(|w| !(w.weight >= 0.0))
        || p.distribution.iter().all(|w| w.weight == 0.0)
    {
        return Err(ValidationError::new("fault_distribution"));
    }
    Ok(())
}

impl Default for FaultParams {
    fn default() -> Self {
        use FaultKind::*;
        use FaultSeverity::*;
        let w = |kind, severity, weight| FaultWeight {
            kind,
            severity,
            weight,
        };
        Self {
            repair_dispatch_probability: 0.02,
            base_clear_probability: 0.01,
            clear_probability_per_hour: 0.05,
            max_fault_duration_seconds: 4 * 3600,
            min_maintenance_seconds: 3600,
            max_maintenance_seconds: 6 * 3600,
            max_failed_strings: 5,
            distribution: vec![
                w(InverterGlitch, Minor, 40.0),
                w(StringFailure, Minor, 25.0),
                w(StringFailure, Major, 15.0),
                w(InverterTrip, Major, 10.0),
                w(GroundFault, Critical, 6.0),
                w(TransformerFailure, Critical, 4.0),
            ],
        }
    }
}

/// Operating mode of a site. Exactly one at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SiteMode {
    Normal,
    Faulted(ActiveFault),
    Maintenance(MaintenanceWindow),
}

impl SiteMode {
    pub fn active_fault(&self) -> Option<&ActiveFault> {
        match self {
            SiteMode::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn maintenance(&self) -> Option<&MaintenanceWindow> {
        match self {
            SiteMode::Maintenance(window) => Some(window),
            _ => None,
        }
    }

    pub fn in_maintenance(&self) -> bool {
        matches!(self, SiteMode::Maintenance(_))
    }
}

/// State changes produced by a transition, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeEvent {
    FaultRaised(ActiveFault),
    FaultCleared {
        fault: ActiveFault,
        reason: ClearReason,
    },
    MaintenanceStarted(MaintenanceWindow),
    MaintenanceEnded(MaintenanceWindow),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: SiteMode,
    pub events: Vec<ModeEvent>,
}

impl Transition {
    fn stay(mode: &SiteMode) -> Self {
        Self {
            next: mode.clone(),
            events: Vec::new(),
        }
    }
}

/// Uniform draws in [0, 1) consumed by one transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionDraw {
    pub maintenance: f64,
    pub repair_dispatch: f64,
    pub fault_onset: f64,
    pub fault_clear: f64,
    /// Index into the fault distribution (already weighted)
    pub fault_pick: usize,
    pub failed_strings: f64,
    pub maintenance_duration: f64,
}

impl TransitionDraw {
    /// Draws that never trigger anything: the mode only ages.
    pub fn quiet() -> Self {
        Self {
            maintenance: 1.0,
            repair_dispatch: 1.0,
            fault_onset: 1.0,
            fault_clear: 1.0,
            fault_pick: 0,
            failed_strings: 0.0,
            maintenance_duration: 0.0,
        }
    }

    /// Draw every random number a transition may need, in a fixed order.
    pub fn sample<R: Rng>(rng: &mut R, machine: &FaultStateMachine) -> Self {
        Self {
            maintenance: rng.gen(),
            repair_dispatch: rng.gen(),
            fault_onset: rng.gen(),
            fault_clear: rng.gen(),
            fault_pick: machine.picker.sample(rng),
            failed_strings: rng.gen(),
            maintenance_duration: rng.gen(),
        }
    }
}

/// Pure transition function plus the distributions it samples from.
#[derive(Debug, Clone)]
pub struct FaultStateMachine {
    params: FaultParams,
    fault_probability: f64,
    maintenance_probability: f64,
    picker: WeightedIndex<f64>,
}

impl FaultStateMachine {
    /// `params` must have passed validation (non-empty, non-negative weights).
    pub fn new(
        params: FaultParams,
        fault_probability: f64,
        maintenance_probability: f64,
    ) -> Result<Self, rand::distributions::WeightedError> {
        let picker = WeightedIndex::new(params.distribution.iter().map(|w| w.weight))?;
        Ok(Self {
            params,
            fault_probability,
            maintenance_probability,
            picker,
        })
    }

    pub fn params(&self) -> &FaultParams {
        &self.params
    }

    pub fn fault_probability(&self) -> f64 {
        self.fault_probability
    }

    /// Per-tick clear probability of a non-critical fault of the given age.
    pub fn clear_probability(&self, age: Duration) -> f64 {
        let hours = age.num_seconds() as f64 / 3600.0;
        (self.params.base_clear_probability + self.params.clear_probability_per_hour * hours)
            .clamp(0.0, 1.0)
    }

    pub fn transition(&self, mode: &SiteMode, now: DateTime<Utc>, draw: &TransitionDraw) -> Transition {
        match mode {
            SiteMode::Maintenance(window) => {
                if window.has_elapsed(now) {
                    Transition {
                        next: SiteMode::Normal,
                        events: vec![ModeEvent::MaintenanceEnded(window.clone())],
                    }
                } else {
                    Transition::stay(mode)
                }
            }
            SiteMode::Normal => {
                if draw.maintenance < self.maintenance_probability {
                    return self.enter_maintenance(None, now, draw);
                }
                if draw.fault_onset < self.fault_probability {
                    let fault = self.pick_fault(now, draw);
                    return Transition {
                        next: SiteMode::Faulted(fault.clone()),
                        events: vec![ModeEvent::FaultRaised(fault)],
                    };
                }
                Transition::stay(mode)
            }
            SiteMode::Faulted(fault) => {
                // A crew can only be sent once the fault has been observed
                let dispatched = fault.severity.forces_shutdown()
                    && fault.age(now) > Duration::zero()
                    && draw.repair_dispatch < self.params.repair_dispatch_probability;
                if draw.maintenance < self.maintenance_probability || dispatched {
                    return self.enter_maintenance(Some(fault), now, draw);
                }
                // Critical faults only clear through maintenance
                if fault.severity.forces_shutdown() {
                    return Transition::stay(mode);
                }
                let age = fault.age(now);
                let reason = if age >= Duration::seconds(self.params.max_fault_duration_seconds) {
                    Some(ClearReason::Expired)
                } else if draw.fault_clear < self.clear_probability(age) {
                    Some(ClearReason::SelfHealed)
                } else {
                    None
                };
                match reason {
                    Some(reason) => Transition {
                        next: SiteMode::Normal,
                        events: vec![ModeEvent::FaultCleared {
                            fault: fault.clone(),
                            reason,
                        }],
                    },
                    None => Transition::stay(mode),
                }
            }
        }
    }

    fn enter_maintenance(
        &self,
        fault: Option<&ActiveFault>,
        now: DateTime<Utc>,
        draw: &TransitionDraw,
    ) -> Transition {
        let p = &self.params;
        let span = (p.max_maintenance_seconds - p.min_maintenance_seconds).max(0) as f64;
        let seconds = p.min_maintenance_seconds + (draw.maintenance_duration * span) as i64;
        let window = MaintenanceWindow::new(now, Duration::seconds(seconds));

        let mut events = Vec::with_capacity(2);
        if let Some(fault) = fault {
            events.push(ModeEvent::FaultCleared {
                fault: fault.clone(),
                reason: ClearReason::Maintenance,
            });
        }
        events.push(ModeEvent::MaintenanceStarted(window.clone()));
        Transition {
            next: SiteMode::Maintenance(window),
            events,
        }
    }

    fn pick_fault(&self, now: DateTime<Utc>, draw: &TransitionDraw) -> ActiveFault {
        let entry = &self.params.distribution[draw.fault_pick.min(self.params.distribution.len() - 1)];
        let mut fault = ActiveFault::new(entry.kind, entry.severity, now);
        if entry.kind == FaultKind::StringFailure {
            let max = self.params.max_failed_strings.max(1);
            fault.failed_strings = 1 + ((draw.failed_strings * max as f64) as u32).min(max - 1);
        }
        fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn machine(fault_p: f64, maintenance_p: f64) -> FaultStateMachine {
        FaultStateMachine::new(FaultParams::default(), fault_p, maintenance_p).unwrap()
    }

    fn critical_fault() -> ActiveFault {
        ActiveFault::new(FaultKind::GroundFault, FaultSeverity::Critical, t0())
    }

    #[test]
    fn test_quiet_draw_keeps_normal() {
        let sm = machine(0.5, 0.5);
        let t = sm.transition(&SiteMode::Normal, t0(), &TransitionDraw::quiet());
        assert_eq!(t.next, SiteMode::Normal);
        assert!(t.events.is_empty());
    }

    #[test]
    fn test_fault_onset_uses_weighted_pick() {
        let sm = machine(0.1, 0.0);
        let draw = TransitionDraw {
            fault_onset: 0.05,
            fault_pick: 4,
            ..TransitionDraw::quiet()
        };
        let t = sm.transition(&SiteMode::Normal, t0(), &draw);
        let fault = t.next.active_fault().expect("faulted");
        assert_eq!(fault.kind, FaultKind::GroundFault);
        assert_eq!(fault.severity, FaultSeverity::Critical);
        assert_eq!(fault.onset, t0());
        assert!(matches!(t.events.as_slice(), [ModeEvent::FaultRaised(_)]));
    }

    #[test]
    fn test_string_failure_carries_failed_strings() {
        let sm = machine(1.0, 0.0);
        for (roll, expected) in [(0.0, 1), (0.5, 3), (0.9999, 5)] {
            let draw = TransitionDraw {
                fault_onset: 0.0,
                fault_pick: 1,
                failed_strings: roll,
                ..TransitionDraw::quiet()
            };
            let t = sm.transition(&SiteMode::Normal, t0(), &draw);
            assert_eq!(t.next.active_fault().unwrap().failed_strings, expected);
        }
    }

    #[test]
    fn test_critical_fault_never_self_heals() {
        let sm = machine(0.0, 0.0);
        let mode = SiteMode::Faulted(critical_fault());
        let draw = TransitionDraw {
            fault_clear: 0.0,
            ..TransitionDraw::quiet()
        };
        // Far past the maximum fault duration
        let t = sm.transition(&mode, t0() + Duration::days(3), &draw);
        assert_eq!(t.next, mode);
    }

    #[test]
    fn test_critical_fault_clears_through_repair_dispatch() {
        let sm = machine(0.0, 0.0);
        let mode = SiteMode::Faulted(critical_fault());
        let draw = TransitionDraw {
            repair_dispatch: 0.0,
            maintenance_duration: 0.0,
            ..TransitionDraw::quiet()
        };
        let now = t0() + Duration::minutes(10);
        let t = sm.transition(&mode, now, &draw);

        let window = t.next.maintenance().expect("maintenance");
        assert_eq!(window.start, now);
        assert_eq!(window.expected_end(), now + Duration::hours(1));
        assert!(matches!(
            t.events.as_slice(),
            [
                ModeEvent::FaultCleared {
                    reason: ClearReason::Maintenance,
                    ..
                },
                ModeEvent::MaintenanceStarted(_)
            ]
        ));
    }

    #[test]
    fn test_no_repair_dispatch_at_onset() {
        let sm = machine(0.0, 0.0);
        let mode = SiteMode::Faulted(critical_fault());
        let draw = TransitionDraw {
            repair_dispatch: 0.0,
            ..TransitionDraw::quiet()
        };
        assert_eq!(sm.transition(&mode, t0(), &draw).next, mode);
    }

    #[test]
    fn test_minor_fault_expires_at_max_duration() {
        let sm = machine(0.0, 0.0);
        let fault = ActiveFault::new(FaultKind::InverterGlitch, FaultSeverity::Minor, t0());
        let mode = SiteMode::Faulted(fault);

        let before = sm.transition(&mode, t0() + Duration::seconds(4 * 3600 - 1), &TransitionDraw::quiet());
        assert_eq!(before.next, mode);

        let after = sm.transition(&mode, t0() + Duration::hours(4), &TransitionDraw::quiet());
        assert_eq!(after.next, SiteMode::Normal);
        assert!(matches!(
            after.events.as_slice(),
            [ModeEvent::FaultCleared {
                reason: ClearReason::Expired,
                ..
            }]
        ));
    }

    #[test]
    fn test_clear_probability_grows_with_age() {
        let sm = machine(0.0, 0.0);
        let young = sm.clear_probability(Duration::minutes(1));
        let old = sm.clear_probability(Duration::hours(3));
        assert!(old > young);
        assert!(sm.clear_probability(Duration::days(100)) <= 1.0);
    }

    #[test]
    fn test_maintenance_ends_deterministically() {
        let sm = machine(1.0, 1.0);
        let window = MaintenanceWindow::new(t0(), Duration::hours(2));
        let mode = SiteMode::Maintenance(window.clone());
        let always = TransitionDraw {
            maintenance: 0.0,
            fault_onset: 0.0,
            ..TransitionDraw::quiet()
        };

        let during = sm.transition(&mode, t0() + Duration::minutes(90), &always);
        assert_eq!(during.next, mode);

        let after = sm.transition(&mode, t0() + Duration::hours(2), &always);
        assert_eq!(after.next, SiteMode::Normal);
        assert_eq!(after.events, vec![ModeEvent::MaintenanceEnded(window)]);
    }

    #[test]
    fn test_maintenance_preempts_fault_onset() {
        let sm = machine(1.0, 1.0);
        let draw = TransitionDraw {
            maintenance: 0.0,
            fault_onset: 0.0,
            ..TransitionDraw::quiet()
        };
        let t = sm.transition(&SiteMode::Normal, t0(), &draw);
        assert!(t.next.in_maintenance());
        assert_eq!(t.events.len(), 1);
    }

    #[test]
    fn test_seeded_draws_replay() {
        let sm = machine(0.01, 0.001);
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(11);
            (0..100).map(|_| TransitionDraw::sample(&mut rng, &sm)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(11);
            (0..100).map(|_| TransitionDraw::sample(&mut rng, &sm)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_params_validate() {
        assert!(FaultParams::default().validate().is_ok());
        let bad = FaultParams {
            min_maintenance_seconds: 10_000,
            max_maintenance_seconds: 100,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
