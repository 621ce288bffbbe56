//! Resource Calculator
//!
//! Computes the CPU/memory request and limit of each task from the action's
//! declared resources and the job definition defaults, then aggregates them
//! into a pipeline envelope.
//!
//! Tasks inside a stage may run concurrently, so a stage's limit is the sum of
//! its tasks' limits. Stages run one after another, so the pipeline limit is
//! the largest stage limit. The pipeline request is the largest single task
//! request, which is the smallest slot the pipeline can be scheduled into.
//!
//! All functions are total. Missing or zero inputs fall back to the platform
//! default.

use serde::{Deserialize, Serialize};

use crate::domain::action::JobDefResources;
use crate::yml::ActionResources;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    pub cpu: f64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AppliedResources {
    pub requests: Resource,
    pub limits: Resource,
}

impl Resource {
    pub fn new(cpu: f64, memory_mb: f64) -> Self {
        Self { cpu, memory_mb }
    }

    fn max(self, other: Resource) -> Resource {
        Resource {
            cpu: self.cpu.max(other.cpu),
            memory_mb: self.memory_mb.max(other.memory_mb),
        }
    }

    fn add(self, other: Resource) -> Resource {
        Resource {
            cpu: self.cpu + other.cpu,
            memory_mb: self.memory_mb + other.memory_mb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceCalculator {
    default: Resource,
    cpu_oversold_rate: f64,
    max_cpu: f64,
}

impl ResourceCalculator {
    pub fn new(default: Resource, cpu_oversold_rate: f64, max_cpu: f64) -> Self {
        Self {
            default,
            cpu_oversold_rate,
            max_cpu,
        }
    }

    pub fn default_resource(&self) -> Resource {
        self.default
    }

    /// Effective request and limit of one task
    pub fn task_resources(
        &self,
        action: &ActionResources,
        def: &JobDefResources,
    ) -> AppliedResources {
        let limits = self.limit(action, def);
        let requests = self.request(action, def);

        AppliedResources {
            requests: Resource {
                cpu: requests.cpu.min(limits.cpu),
                memory_mb: requests.memory_mb.min(limits.memory_mb),
            },
            limits,
        }
    }

    /// Scale a CPU limit by the oversold rate and cap it at the ceiling
    pub fn oversold_cpu(&self, cpu: f64) -> f64 {
        let scaled = cpu * self.cpu_oversold_rate;
        if scaled.is_nan() {
            return self.max_cpu;
        }
        scaled.min(self.max_cpu)
    }

    fn limit(&self, action: &ActionResources, def: &JobDefResources) -> Resource {
        let cpu = [def.max_cpu, def.cpu, action.max_cpu, action.cpu]
            .into_iter()
            .fold(0.0, f64::max);
        let cpu = or_default(cpu, self.default.cpu);

        // memory oversold is not supported yet
        let memory_mb = [def.max_mem, def.mem, action.mem]
            .into_iter()
            .fold(0.0, f64::max);

        Resource {
            cpu: self.oversold_cpu(cpu),
            memory_mb: or_default(memory_mb, self.default.memory_mb),
        }
    }

    fn request(&self, action: &ActionResources, def: &JobDefResources) -> Resource {
        let mut cpu = min_positive([def.max_cpu, def.cpu]);
        if action.min_cpu > 0.0 {
            cpu = action.min_cpu;
        } else if action.cpu > 0.0 {
            cpu = action.cpu;
        }

        let mut memory_mb = min_positive([def.max_mem, def.mem]);
        if action.mem > 0.0 {
            memory_mb = action.mem;
        }

        Resource {
            cpu: or_default(cpu, self.default.cpu),
            memory_mb: or_default(memory_mb, self.default.memory_mb),
        }
    }
}

fn or_default(value: f64, default: f64) -> f64 {
    if value > 0.0 { value } else { default }
}

fn min_positive<const N: usize>(values: [f64; N]) -> f64 {
    values
        .into_iter()
        .filter(|v| *v > 0.0)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
        .unwrap_or(0.0)
}

// =============================================================================
// Aggregation
// =============================================================================

/// Sum of the task limits in one stage
pub fn stage_limit(tasks: &[AppliedResources]) -> Resource {
    tasks
        .iter()
        .fold(Resource::default(), |acc, t| acc.add(t.limits))
}

/// Largest stage limit, per dimension
pub fn pipeline_limit(stages: &[Vec<AppliedResources>]) -> Resource {
    stages
        .iter()
        .map(|tasks| stage_limit(tasks))
        .fold(Resource::default(), Resource::max)
}

/// Largest single task request, per dimension
pub fn pipeline_request(stages: &[Vec<AppliedResources>]) -> Resource {
    stages
        .iter()
        .flatten()
        .fold(Resource::default(), |acc, t| acc.max(t.requests))
}

pub fn pipeline_resources(stages: &[Vec<AppliedResources>]) -> AppliedResources {
    AppliedResources {
        requests: pipeline_request(stages),
        limits: pipeline_limit(stages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn calculator() -> ResourceCalculator {
        ResourceCalculator::new(Resource::new(0.5, 2048.0), 1.0, 4.0)
    }

    fn applied(req_cpu: f64, req_mem: f64, lim_cpu: f64, lim_mem: f64) -> AppliedResources {
        AppliedResources {
            requests: Resource::new(req_cpu, req_mem),
            limits: Resource::new(lim_cpu, lim_mem),
        }
    }

    #[test]
    fn test_all_zero_falls_back_to_default() {
        let r = calculator().task_resources(&ActionResources::default(), &JobDefResources::default());
        assert_eq!(r.requests, Resource::new(0.5, 2048.0));
        assert_eq!(r.limits, Resource::new(0.5, 2048.0));
    }

    #[test]
    fn test_limit_takes_max_of_all_sources() {
        let action = ActionResources {
            cpu: 1.0,
            max_cpu: 1.5,
            min_cpu: 0.0,
            mem: 1024.0,
        };
        let def = JobDefResources {
            cpu: 0.5,
            max_cpu: 2.0,
            mem: 512.0,
            max_mem: 3072.0,
        };
        let r = calculator().task_resources(&action, &def);
        assert_eq!(r.limits, Resource::new(2.0, 3072.0));
    }

    #[test]
    fn test_request_prefers_action_minimum() {
        let def = JobDefResources {
            cpu: 0.5,
            max_cpu: 2.0,
            mem: 512.0,
            max_mem: 3072.0,
        };
        let calc = calculator();

        let r = calc.task_resources(&ActionResources::default(), &def);
        assert_eq!(r.requests, Resource::new(0.5, 512.0));

        let action = ActionResources {
            cpu: 1.0,
            min_cpu: 0.2,
            mem: 1024.0,
            ..Default::default()
        };
        let r = calc.task_resources(&action, &def);
        assert_eq!(r.requests, Resource::new(0.2, 1024.0));

        let action = ActionResources {
            cpu: 1.0,
            ..Default::default()
        };
        let r = calc.task_resources(&action, &def);
        assert_eq!(r.requests.cpu, 1.0);
    }

    #[test]
    fn test_oversold_scales_and_caps() {
        let calc = ResourceCalculator::new(Resource::new(0.5, 2048.0), 2.0, 3.0);
        assert_eq!(calc.oversold_cpu(1.0), 2.0);
        assert_eq!(calc.oversold_cpu(2.0), 3.0);
    }

    #[test]
    fn test_request_never_exceeds_capped_limit() {
        let calc = ResourceCalculator::new(Resource::new(0.5, 2048.0), 1.0, 1.0);
        let action = ActionResources {
            cpu: 3.0,
            ..Default::default()
        };
        let r = calc.task_resources(&action, &JobDefResources::default());
        assert_eq!(r.limits.cpu, 1.0);
        assert_eq!(r.requests.cpu, 1.0);
    }

    #[test]
    fn test_pipeline_aggregation() {
        let stages = vec![
            vec![applied(0.5, 512.0, 1.0, 1024.0), applied(1.0, 256.0, 2.0, 1024.0)],
            vec![applied(0.2, 4096.0, 2.5, 4096.0)],
        ];
        let r = pipeline_resources(&stages);
        assert_eq!(r.limits, Resource::new(3.0, 4096.0));
        assert_eq!(r.requests, Resource::new(1.0, 4096.0));
    }

    #[test]
    fn test_empty_pipeline_is_zero() {
        assert_eq!(pipeline_resources(&[]), AppliedResources::default());
    }

    fn applied_strategy() -> impl Strategy<Value = AppliedResources> {
        (0.0..8.0f64, 0.0..8192.0f64, 0.0..8.0f64, 0.0..8192.0f64)
            .prop_map(|(a, b, c, d)| applied(a, b, c, d))
    }

    proptest! {
        #[test]
        fn prop_pipeline_limit_is_max_of_stage_sums(
            stages in prop::collection::vec(prop::collection::vec(applied_strategy(), 0..5), 0..6)
        ) {
            let limit = pipeline_limit(&stages);
            let expected_cpu = stages
                .iter()
                .map(|s| s.iter().map(|t| t.limits.cpu).sum::<f64>())
                .fold(0.0, f64::max);
            let expected_mem = stages
                .iter()
                .map(|s| s.iter().map(|t| t.limits.memory_mb).sum::<f64>())
                .fold(0.0, f64::max);
            prop_assert!((limit.cpu - expected_cpu).abs() < 1e-9);
            prop_assert!((limit.memory_mb - expected_mem).abs() < 1e-9);
        }

        #[test]
        fn prop_pipeline_request_is_max_single_task(
            stages in prop::collection::vec(prop::collection::vec(applied_strategy(), 0..5), 0..6)
        ) {
            let request = pipeline_request(&stages);
            let expected_cpu = stages.iter().flatten().map(|t| t.requests.cpu).fold(0.0, f64::max);
            let expected_mem = stages.iter().flatten().map(|t| t.requests.memory_mb).fold(0.0, f64::max);
            prop_assert_eq!(request.cpu, expected_cpu);
            prop_assert_eq!(request.memory_mb, expected_mem);
        }

        #[test]
        fn prop_oversold_cpu_never_exceeds_ceiling(
            cpu in 0.0..1.0e12f64,
            max_cpu in 0.0..1.0e12f64,
            rate in 0.0..100.0f64,
            action_cpu in 0.0..1.0e12f64,
            def_max_cpu in 0.0..1.0e12f64,
        ) {
            let calc = ResourceCalculator::new(Resource::new(cpu, 1024.0), rate, max_cpu.max(0.1));
            let action = ActionResources { cpu: action_cpu, ..Default::default() };
            let def = JobDefResources { max_cpu: def_max_cpu, ..Default::default() };
            let r = calc.task_resources(&action, &def);
            prop_assert!(r.limits.cpu <= max_cpu.max(0.1));
            prop_assert!(r.requests.cpu <= r.limits.cpu);
        }

        #[test]
        fn prop_zero_declarations_yield_default(cpu in 0.01..16.0f64, mem in 1.0..65536.0f64) {
            let calc = ResourceCalculator::new(Resource::new(cpu, mem), 1.0, 16.0);
            let r = calc.task_resources(&ActionResources::default(), &JobDefResources::default());
            prop_assert_eq!(r.requests, Resource::new(cpu, mem));
            prop_assert_eq!(r.limits, Resource::new(cpu, mem));
        }
    }
}
