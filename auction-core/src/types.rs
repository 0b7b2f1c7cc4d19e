// Core ID types and type aliases

// === TYPE ALIASES ===

pub type AgentId = String;
pub type Price = f64;
pub type Quantity = f64;
/// Index of a simulation step.
pub type Step = usize;

// === STEP-INDEXED SERIES ===

/// Mutable slot for `step`, growing the series with defaults if needed.
pub(crate) fn step_slot<T: Clone + Default>(series: &mut Vec<T>, step: Step) -> &mut T {
    if series.len() <= step {
        series.resize(step + 1, T::default());
    }
    &mut series[step]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_slot_grows_series() {
        let mut series: Vec<f64> = vec![1.0];
        *step_slot(&mut series, 3) += 2.5;
        assert_eq!(series, vec![1.0, 0.0, 0.0, 2.5]);

        *step_slot(&mut series, 0) += 1.0;
        assert_eq!(series[0], 2.0);
    }
}
