//! Ping-pong scheduling for the pass chain.

/// A texture a pass reads from or the chain exposes as output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The raw scene capture.
    Raw,
    /// One of the two ping-pong targets.
    PingPong(usize),
}

/// One processed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStep {
    /// Index of the pass in registration order.
    pub pass_index: usize,
    /// Where the pass reads its input.
    pub source: Slot,
    /// Ping-pong target the pass writes.
    pub destination: usize,
}

/// Read/write schedule for one frame.
///
/// The read index starts at 0 each frame and flips once per enabled pass.
/// A step never writes the slot it reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainPlan {
    steps: Vec<ChainStep>,
    current_read: usize,
}

impl ChainPlan {
    /// Plan a frame for passes whose enabled flags are given in registration order.
    pub fn new(enabled: impl IntoIterator<Item = bool>) -> Self {
        let mut plan = Self::default();
        for (pass_index, enabled) in enabled.into_iter().enumerate() {
            if !enabled {
                continue;
            }
            let source = if plan.steps.is_empty() {
                Slot::Raw
            } else {
                Slot::PingPong(plan.current_read)
            };
            let destination = 1 - plan.current_read;
            plan.steps.push(ChainStep {
                pass_index,
                source,
                destination,
            });
            plan.current_read = destination;
        }
        plan
    }

    /// Steps in execution order.
    #[inline]
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Number of processed passes.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no pass is enabled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ping-pong index holding the last written output.
    #[inline]
    pub fn current_read(&self) -> usize {
        self.current_read
    }

    /// Texture exposed as the processed result.
    pub fn output(&self) -> Slot {
        if self.steps.is_empty() {
            Slot::Raw
        } else {
            Slot::PingPong(self.current_read)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_passes_exposes_raw() {
        let plan = ChainPlan::new([false, false]);
        assert!(plan.is_empty());
        assert_eq!(plan.output(), Slot::Raw);
        assert_eq!(plan.current_read(), 0);
    }

    #[test]
    fn test_disabled_pass_leaves_chain() {
        let plan = ChainPlan::new([true, false, true]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.current_read(), 0);
        assert_eq!(plan.output(), Slot::PingPong(0));
        assert_eq!(
            plan.steps(),
            &[
                ChainStep {
                    pass_index: 0,
                    source: Slot::Raw,
                    destination: 1,
                },
                ChainStep {
                    pass_index: 2,
                    source: Slot::PingPong(1),
                    destination: 0,
                },
            ]
        );
    }

    #[test]
    fn test_read_index_is_count_mod_two() {
        for count in 0..8 {
            let plan = ChainPlan::new(std::iter::repeat(true).take(count));
            assert_eq!(plan.current_read(), count % 2);
        }
    }

    #[test]
    fn test_read_index_ignores_skipped_passes() {
        let dense = ChainPlan::new([true, true, true]);
        let sparse = ChainPlan::new([false, true, false, true, false, true, false]);
        assert_eq!(dense.current_read(), sparse.current_read());
    }

    #[test]
    fn test_step_never_reads_its_destination() {
        let plan = ChainPlan::new([true, true, false, true, true]);
        for step in plan.steps() {
            assert_ne!(step.source, Slot::PingPong(step.destination));
        }
    }
}
