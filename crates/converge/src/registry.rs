//! Step registry and plan construction
//!
//! Registration order is authoring order only. [`StepRegistry::build_plan`]
//! validates the declarations and topologically sorts them; ties are broken
//! by registration order so plans are deterministic.

use crate::error::{Error, Result};
use crate::step::{SharedStep, Step};
use crate::types::Phase;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Ordered set of declared steps
#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<SharedStep>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step
    pub fn register<S: Step + 'static>(&mut self, step: S) -> &mut Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// All steps in declaration order
    pub fn all_steps(&self) -> &[SharedStep] {
        &self.steps
    }

    pub fn get(&self, id: &str) -> Option<&SharedStep> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Build a plan scoped to `phases`.
    ///
    /// The whole graph is validated even when only some phases are
    /// requested, so a bad declaration never hides behind a phase filter.
    pub fn build_plan(&self, phases: &BTreeSet<Phase>) -> Result<ProvisioningPlan> {
        let order = self.sorted_indices()?;

        // Dependencies never point to a later phase, so a stable sort by
        // phase keeps the topological order valid.
        let mut ordered: Vec<&SharedStep> = order.iter().map(|&i| &self.steps[i]).collect();
        ordered.sort_by_key(|s| s.phase());

        let steps = ordered
            .into_iter()
            .filter(|s| phases.contains(&s.phase()))
            .cloned()
            .collect();

        Ok(ProvisioningPlan {
            phases: phases.clone(),
            steps,
        })
    }

    /// Validate declarations and return indices in topological order.
    fn sorted_indices(&self) -> Result<Vec<usize>> {
        let mut index: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.id(), i).is_some() {
                return Err(Error::DuplicateStep {
                    id: step.id().to_string(),
                });
            }
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let mut resolved = Vec::new();
            for dep in step.depends_on() {
                let Some(&j) = index.get(dep.as_str()) else {
                    return Err(Error::UnknownDependency {
                        step: step.id().to_string(),
                        dependency: dep,
                    });
                };
                let dep_phase = self.steps[j].phase();
                if dep_phase > step.phase() {
                    return Err(Error::PhaseOrder {
                        step: step.id().to_string(),
                        phase: step.phase().to_string(),
                        dependency: dep,
                        dependency_phase: dep_phase.to_string(),
                    });
                }
                if !resolved.contains(&j) {
                    resolved.push(j);
                }
            }
            deps.push(resolved);
        }

        // Kahn's algorithm; the ready set is ordered by registration index
        let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.steps.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.steps.len() {
            return Err(Error::CyclicDependency {
                cycle: self.find_cycle(&deps, &remaining),
            });
        }

        Ok(order)
    }

    /// Walk unresolved dependencies from any blocked step until a node repeats.
    fn find_cycle(&self, deps: &[Vec<usize>], remaining: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.steps.len()).find(|&i| remaining[i] > 0) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = deps[current].iter().find(|&&d| remaining[d] > 0) else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.steps[i].id().to_string())
                    .collect();
                cycle.push(self.steps[next].id().to_string());
                return cycle;
            }
            path.push(next);
            current = next;
        }

        path.iter()
            .map(|&i| self.steps[i].id().to_string())
            .collect()
    }
}

/// An immutable, ordered sequence of steps scoped to a set of phases
#[derive(Clone)]
pub struct ProvisioningPlan {
    phases: BTreeSet<Phase>,
    steps: Vec<SharedStep>,
}

impl ProvisioningPlan {
    /// Requested phases, in execution order
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.phases.iter().copied()
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[SharedStep] {
        &self.steps
    }

    /// Steps of a single phase, in execution order
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &SharedStep> {
        self.steps.iter().filter(move |s| s.phase() == phase)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for ProvisioningPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningPlan")
            .field("phases", &self.phases)
            .field("steps", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::step::ApplyContext;

    #[derive(Debug)]
    struct Decl {
        id: String,
        phase: Phase,
        deps: Vec<String>,
    }

    impl Step for Decl {
        fn id(&self) -> &str {
            &self.id
        }

        fn description(&self) -> String {
            format!("Declared step {}", self.id)
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        fn depends_on(&self) -> Vec<String> {
            self.deps.clone()
        }

        fn is_applied(&self) -> std::result::Result<bool, StepError> {
            Ok(false)
        }

        fn apply(&self, _ctx: &ApplyContext) -> std::result::Result<(), StepError> {
            Ok(())
        }
    }

    fn decl(id: &str, phase: Phase, deps: &[&str]) -> Decl {
        Decl {
            id: id.to_string(),
            phase,
            deps: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn all_phases() -> BTreeSet<Phase> {
        Phase::ALL.into_iter().collect()
    }

    fn assert_topological(plan: &ProvisioningPlan) {
        let ids = plan.ids();
        for step in plan.steps() {
            let pos = ids.iter().position(|id| *id == step.id()).unwrap();
            for dep in step.depends_on() {
                if let Some(dep_pos) = ids.iter().position(|id| *id == dep) {
                    assert!(dep_pos < pos, "{dep} must precede {}", step.id());
                }
            }
        }
    }

    #[test]
    fn test_declaration_order_is_not_run_order() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("configureFirewall", Phase::Install, &["hardenSSH"]))
            .register(decl("hardenSSH", Phase::Install, &["installPackages"]))
            .register(decl("installPackages", Phase::Install, &[]));

        let plan = registry.build_plan(&all_phases()).unwrap();
        assert_eq!(
            plan.ids(),
            vec!["installPackages", "hardenSSH", "configureFirewall"]
        );
    }

    #[test]
    fn test_independent_steps_keep_registration_order() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("b", Phase::Install, &[]))
            .register(decl("a", Phase::Install, &[]))
            .register(decl("c", Phase::Install, &["a"]));

        let plan = registry.build_plan(&all_phases()).unwrap();
        assert_eq!(plan.ids(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_topological_validity_across_phases() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("deploy.up", Phase::Deploy, &["render.env", "docker"]))
            .register(decl("render.env", Phase::Configure, &["secrets"]))
            .register(decl("secrets", Phase::Configure, &[]))
            .register(decl("firewall", Phase::Configure, &["packages"]))
            .register(decl("docker", Phase::Install, &["packages"]))
            .register(decl("packages", Phase::Install, &["index"]))
            .register(decl("index", Phase::Install, &[]));

        let plan = registry.build_plan(&all_phases()).unwrap();
        assert_eq!(plan.len(), 7);
        assert_topological(&plan);

        // Phases are contiguous and in order
        let phases: Vec<Phase> = plan.steps().iter().map(|s| s.phase()).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
    }

    #[test]
    fn test_plan_scoped_to_phases() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("packages", Phase::Install, &[]))
            .register(decl("firewall", Phase::Configure, &["packages"]))
            .register(decl("up", Phase::Deploy, &["firewall"]));

        let phases: BTreeSet<Phase> = [Phase::Configure].into_iter().collect();
        let plan = registry.build_plan(&phases).unwrap();
        assert_eq!(plan.ids(), vec!["firewall"]);
        assert_eq!(plan.phases().collect::<Vec<_>>(), vec![Phase::Configure]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("a", Phase::Install, &["c"]))
            .register(decl("b", Phase::Install, &["a"]))
            .register(decl("c", Phase::Install, &["b"]))
            .register(decl("d", Phase::Install, &[]));

        let err = registry.build_plan(&all_phases()).unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_detected_outside_requested_phases() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("x", Phase::Deploy, &["y"]))
            .register(decl("y", Phase::Deploy, &["x"]))
            .register(decl("p", Phase::Install, &[]));

        let phases: BTreeSet<Phase> = [Phase::Install].into_iter().collect();
        assert!(matches!(
            registry.build_plan(&phases),
            Err(Error::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut registry = StepRegistry::new();
        registry.register(decl("a", Phase::Install, &["a"]));
        assert!(matches!(
            registry.build_plan(&all_phases()),
            Err(Error::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("a", Phase::Install, &[]))
            .register(decl("a", Phase::Install, &[]));
        assert!(matches!(
            registry.build_plan(&all_phases()),
            Err(Error::DuplicateStep { .. })
        ));

        let mut registry = StepRegistry::new();
        registry.register(decl("a", Phase::Install, &["ghost"]));
        assert!(matches!(
            registry.build_plan(&all_phases()),
            Err(Error::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_dependency_on_later_phase_rejected() {
        let mut registry = StepRegistry::new();
        registry
            .register(decl("packages", Phase::Install, &["up"]))
            .register(decl("up", Phase::Deploy, &[]));
        assert!(matches!(
            registry.build_plan(&all_phases()),
            Err(Error::PhaseOrder { .. })
        ));
    }
}
