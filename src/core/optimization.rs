use crate::core::frame288::Frame288;
use crate::core::units::MONTHS_PER_YEAR;
use ordered_float::OrderedFloat;
use std::collections::BTreeSet;

/// Converts a cost-signal month-hour table (a rate, GHG or system-peak
/// signal) into a charge or discharge threshold table.
///
/// Per month column the 24 distinct values are ranked; the best `level`
/// values are selected (all-but-`|level|` worst when `level` is negative),
/// best meaning lowest when `minimize` is set and highest otherwise. Every
/// hour carrying a selected value receives `threshold`; all other hours
/// receive a pass-through sentinel chosen so it can never trigger the
/// paired strategy - negative infinity for a charge schedule, positive
/// infinity for a discharge schedule.
pub fn optimize_schedule(
    cost: &Frame288,
    level: i32,
    charge: bool,
    minimize: bool,
    threshold: f64,
) -> Frame288 {
    let sentinel = if charge {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    let mut schedule = Frame288::uniform(sentinel);
    for month in 1..=MONTHS_PER_YEAR {
        let values = cost.month_values(month);
        let mut ranked: Vec<OrderedFloat<f64>> = values
            .iter()
            .map(|&value| OrderedFloat(value))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !minimize {
            ranked.reverse();
        }
        let keep = if level >= 0 {
            (level as usize).min(ranked.len())
        } else {
            ranked.len().saturating_sub(level.unsigned_abs() as usize)
        };
        let selected: BTreeSet<OrderedFloat<f64>> = ranked.into_iter().take(keep).collect();
        for (hour, &value) in values.iter().enumerate() {
            if selected.contains(&OrderedFloat(value)) {
                schedule.set(month, hour as u32, threshold);
            }
        }
    }
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn cost_signal() -> Frame288 {
        // cheapest overnight, most expensive in the evening peak
        Frame288::from_fn(|month, hour| {
            let base = match hour {
                0..=5 => 1.,
                18..=21 => 9.,
                _ => 5.,
            };
            base + month as f64 / 100.
        })
    }

    #[rstest]
    fn level_one_should_select_the_single_best_value(cost_signal: Frame288) {
        let schedule = optimize_schedule(&cost_signal, 1, true, true, 0.);
        for month in 1..=12 {
            let selected: Vec<u32> = (0..24)
                .filter(|&hour| schedule.get(month, hour) == 0.)
                .collect();
            // hours 0-5 share the lowest cost, so the whole block is selected
            assert_eq!(selected, vec![0, 1, 2, 3, 4, 5]);
            assert_eq!(schedule.get(month, 12), f64::NEG_INFINITY);
        }
    }

    #[rstest]
    fn negative_level_should_drop_the_worst_value(cost_signal: Frame288) {
        let schedule = optimize_schedule(&cost_signal, -1, true, true, 0.);
        for month in 1..=12 {
            // everything but the most expensive block is selected
            for hour in 0..24 {
                let expected = if (18..=21).contains(&hour) {
                    f64::NEG_INFINITY
                } else {
                    0.
                };
                assert_eq!(schedule.get(month, hour), expected);
            }
        }
    }

    #[rstest]
    fn discharge_schedules_should_pass_through_with_infinity(cost_signal: Frame288) {
        let schedule = optimize_schedule(&cost_signal, 1, false, false, 100.);
        for month in 1..=12 {
            for hour in 0..24 {
                let expected = if (18..=21).contains(&hour) {
                    100.
                } else {
                    f64::INFINITY
                };
                assert_eq!(schedule.get(month, hour), expected);
            }
        }
    }

    #[rstest]
    fn distinct_values_should_rank_once_despite_duplicates() {
        let mut cost = Frame288::uniform(2.);
        cost.set(1, 3, 1.);
        cost.set(1, 4, 1.);
        let schedule = optimize_schedule(&cost, 1, true, true, 0.);
        // both hours share the single best value
        assert_eq!(schedule.get(1, 3), 0.);
        assert_eq!(schedule.get(1, 4), 0.);
        assert_eq!(schedule.get(1, 5), f64::NEG_INFINITY);
    }
}
