use weft_core::config::MaintenanceConfig;

/// What maintenance is due after a node completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeTriggers {
    pub recite: bool,
    pub reflect: bool,
}

/// Per-run maintenance counters.
///
/// One instance per run, carried with the run's state and passed by
/// reference — never a field on a shared long-lived object, so concurrent
/// runs cannot cross-contaminate. Counters only ever grow.
#[derive(Debug)]
pub struct MaintenanceTriggers {
    config: MaintenanceConfig,
    steps_completed: u64,
    nodes_completed: u64,
}

impl MaintenanceTriggers {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            config,
            steps_completed: 0,
            nodes_completed: 0,
        }
    }

    /// Record one completed step. Returns whether a recitation is due.
    pub fn record_step(&mut self) -> bool {
        self.steps_completed += 1;
        self.config.recite_every_steps > 0
            && self.steps_completed % self.config.recite_every_steps == 0
    }

    /// Record one completed node. Returns what maintenance is due.
    pub fn record_node(&mut self) -> NodeTriggers {
        self.nodes_completed += 1;
        NodeTriggers {
            recite: self.record_step(),
            reflect: self.config.reflect_every_nodes > 0
                && self.nodes_completed % self.config.reflect_every_nodes == 0,
        }
    }

    /// Whether estimated usage has crossed the compaction fraction of the
    /// token budget.
    pub fn should_compact(&self, estimated_tokens: usize, budget_tokens: usize) -> bool {
        budget_tokens > 0
            && estimated_tokens as f64 >= budget_tokens as f64 * self.config.compact_at_fraction
    }

    pub fn steps_completed(&self) -> u64 {
        self.steps_completed
    }

    pub fn nodes_completed(&self) -> u64 {
        self.nodes_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(recite: u64, reflect: u64) -> MaintenanceConfig {
        MaintenanceConfig {
            recite_every_steps: recite,
            reflect_every_nodes: reflect,
            compact_at_fraction: 0.6,
        }
    }

    #[test]
    fn test_recite_cadence() {
        let mut triggers = MaintenanceTriggers::new(config(3, 100));
        assert!(!triggers.record_step());
        assert!(!triggers.record_step());
        assert!(triggers.record_step());
        assert!(!triggers.record_step());
        assert_eq!(triggers.steps_completed(), 4);
    }

    #[test]
    fn test_reflect_cadence() {
        let mut triggers = MaintenanceTriggers::new(config(100, 2));
        assert!(!triggers.record_node().reflect);
        assert!(triggers.record_node().reflect);
        assert!(!triggers.record_node().reflect);
        assert!(triggers.record_node().reflect);
    }

    #[test]
    fn test_counters_never_reset() {
        let mut triggers = MaintenanceTriggers::new(config(2, 2));
        for _ in 0..5 {
            triggers.record_node();
        }
        assert_eq!(triggers.nodes_completed(), 5);
        assert_eq!(triggers.steps_completed(), 5);
    }

    #[test]
    fn test_compaction_threshold() {
        let triggers = MaintenanceTriggers::new(config(5, 3));
        assert!(!triggers.should_compact(5_000, 10_000));
        assert!(triggers.should_compact(6_000, 10_000));
        assert!(triggers.should_compact(9_999, 10_000));
        assert!(!triggers.should_compact(1, 0));
    }

    #[test]
    fn test_zero_cadence_disables() {
        let mut triggers = MaintenanceTriggers::new(config(0, 0));
        assert!(!triggers.record_step());
        let node = triggers.record_node();
        assert!(!node.recite);
        assert!(!node.reflect);
    }
}
