//! Pure capacity arithmetic: no I/O, no async, just the numbers. Kept
//! separate from the handlers so the boundary behaviors in the invariant
//! suite can be tested directly against these functions.

use fleetctl_types::{AdjustmentType, Cluster};

/// `new = f(current, adj_type, number, min_step)`, per the table in the
/// component design: EXACT_CAPACITY ignores `current`, CHANGE_IN_CAPACITY
/// is a plain delta, CHANGE_IN_PERCENTAGE rounds away from zero and floors
/// the magnitude of the delta at `min_step`.
pub fn calculate_desired(
    current: i64,
    adj_type: AdjustmentType,
    number: i64,
    min_step: Option<i64>,
) -> i64 {
    match adj_type {
        AdjustmentType::ExactCapacity => number,
        AdjustmentType::ChangeInCapacity => current + number,
        AdjustmentType::ChangeInPercentage => {
            let min_step = min_step.unwrap_or(1).max(1);
            let raw = (current as f64) * (number as f64) / 100.0;
            let delta = if raw.abs() < min_step as f64 {
                number.signum() * min_step
            } else {
                raw.round() as i64
            };
            current + delta
        }
    }
}

/// Clamps `desired` into `[min, max]`, falling back to the cluster's own
/// bounds when an override is absent. `max < 0` (including the cluster's
/// own `UNBOUNDED`) means no upper bound.
pub fn truncate_desired(
    cluster: &Cluster,
    desired: i64,
    min_size: Option<i64>,
    max_size: Option<i64>,
) -> i64 {
    let min = min_size.unwrap_or(cluster.min_size);
    let max = cluster.effective_max(max_size);

    let mut d = desired.max(min);
    if let Some(max) = max {
        d = d.min(max);
    }
    d
}

/// Diagnoses whether `(desired, min_size, max_size, strict)` is acceptable
/// against `cluster`'s current state. Returns `Err(reason)` naming the
/// offending bound on the first violation found, matching the source's
/// sanity-checking order: strict-desired bounds first, then self-consistency
/// of the new (min, max) pair, then consistency against whichever of
/// desired/min/max is *not* being changed.
///
/// `desired_given` distinguishes "desired is being explicitly set by this
/// request" from "desired defaulted to the cluster's current value because
/// no adjustment was requested" — the two cases differ in whether a
/// min/max-only change is allowed to contradict the unchanged desired.
pub fn validate(
    cluster: &Cluster,
    desired: i64,
    desired_given: bool,
    min_size: Option<i64>,
    max_size: Option<i64>,
    strict: bool,
) -> Result<(), String> {
    if desired_given && strict {
        if let Some(min) = min_size {
            if desired < min {
                return Err(format!(
                    "The target capacity ({desired}) is less than the specified min_size ({min})."
                ));
            }
        } else if desired < cluster.min_size {
            return Err(format!(
                "The target capacity ({desired}) is less than the cluster's min_size ({}).",
                cluster.min_size
            ));
        }

        if let Some(max) = max_size {
            if max >= 0 && desired > max {
                return Err(format!(
                    "The target capacity ({desired}) is greater than the specified max_size ({max})."
                ));
            }
        } else if cluster.max_size >= 0 && desired > cluster.max_size {
            return Err(format!(
                "The target capacity ({desired}) is greater than the cluster's max_size ({}).",
                cluster.max_size
            ));
        }
    }

    if let Some(min) = min_size {
        if let Some(max) = max_size {
            if max >= 0 && min > max {
                return Err(
                    "The specified min_size is greater than the specified max_size.".to_string(),
                );
            }
        } else if cluster.max_size >= 0 && min > cluster.max_size {
            return Err(
                "The specified min_size is greater than the current max_size of the cluster."
                    .to_string(),
            );
        }

        if !desired_given && min > cluster.desired_capacity {
            return Err(
                "The specified min_size is greater than the current desired_capacity of the cluster."
                    .to_string(),
            );
        }
    }

    if let Some(max) = max_size {
        if min_size.is_none() && max >= 0 && max < cluster.min_size {
            return Err(
                "The specified max_size is less than the current min_size of the cluster."
                    .to_string(),
            );
        }
        if !desired_given && max >= 0 && max < cluster.desired_capacity {
            return Err(
                "The specified max_size is less than the current desired_capacity of the cluster."
                    .to_string(),
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetctl_types::ClusterStatus;
    use uuid::Uuid;

    fn cluster(min: i64, max: i64, desired: i64) -> Cluster {
        Cluster {
            id: Uuid::new_v4(),
            name: "c".into(),
            user: "u".into(),
            project: "p".into(),
            domain: "d".into(),
            profile_id: Uuid::new_v4(),
            min_size: min,
            max_size: max,
            desired_capacity: desired,
            status: ClusterStatus::Active,
            status_reason: String::new(),
            next_index: 0,
            updated_time: chrono::Utc::now(),
            policies: vec![],
        }
    }

    #[test]
    fn exact_capacity_ignores_current() {
        assert_eq!(
            calculate_desired(10, AdjustmentType::ExactCapacity, 3, None),
            3
        );
    }

    #[test]
    fn change_in_capacity_is_a_delta() {
        assert_eq!(
            calculate_desired(10, AdjustmentType::ChangeInCapacity, -4, None),
            6
        );
    }

    #[test]
    fn percentage_rounds_away_from_zero() {
        // 10 * 15% = 1.5 -> rounds to 2, away from zero.
        assert_eq!(
            calculate_desired(10, AdjustmentType::ChangeInPercentage, 15, Some(1)),
            12
        );
        assert_eq!(
            calculate_desired(10, AdjustmentType::ChangeInPercentage, -15, Some(1)),
            8
        );
    }

    #[test]
    fn percentage_floors_at_min_step_b2() {
        // 10 * 1% = 0.1, below min_step=2, so delta floors to sign(number)*min_step.
        assert_eq!(
            calculate_desired(10, AdjustmentType::ChangeInPercentage, 1, Some(2)),
            12
        );
        assert_eq!(
            calculate_desired(10, AdjustmentType::ChangeInPercentage, -1, Some(2)),
            8
        );
    }

    #[test]
    fn truncate_clamps_to_cluster_bounds() {
        let c = cluster(2, 5, 3);
        assert_eq!(truncate_desired(&c, 10, None, None), 5);
        assert_eq!(truncate_desired(&c, 0, None, None), 2);
        assert_eq!(truncate_desired(&c, 4, None, None), 4);
    }

    #[test]
    fn truncate_unbounded_max_b1() {
        let c = cluster(0, -1, 3);
        assert_eq!(truncate_desired(&c, 1_000_000, None, None), 1_000_000);
    }

    #[test]
    fn validate_strict_rejects_below_min_b3() {
        let c = cluster(2, 5, 3);
        let err = validate(&c, 1, true, None, None, true).unwrap_err();
        assert!(err.contains("min_size"));
    }

    #[test]
    fn validate_non_strict_allows_out_of_band_desired() {
        let c = cluster(2, 5, 3);
        assert!(validate(&c, 1, true, None, None, false).is_ok());
    }

    #[test]
    fn validate_rejects_inverted_min_max() {
        let c = cluster(2, 5, 3);
        assert!(validate(&c, 3, false, Some(6), Some(5), false).is_err());
    }

    #[test]
    fn validate_rejects_new_min_above_unchanged_desired() {
        let c = cluster(0, 5, 3);
        let err = validate(&c, 3, false, Some(4), None, false).unwrap_err();
        assert!(err.contains("desired_capacity"));
    }

    #[test]
    fn validate_allows_new_min_when_desired_also_moves() {
        let c = cluster(0, 5, 3);
        assert!(validate(&c, 4, true, Some(4), None, false).is_ok());
    }
}
