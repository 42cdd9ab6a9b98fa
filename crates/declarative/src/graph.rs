//! Dependency graph builder
//!
//! Tasks are collected into a [`TaskSet`], deduplicated by key, and then
//! built into an immutable [`TaskGraph`] with a deterministic topological
//! order. Dangling references and cycles are rejected here, before anything
//! touches a backend.

use crate::error::{Error, Result};
use crate::node::{Node, TaskNode};
use crate::target::{TargetKind, terraform_name};
use crate::task::Task;
use crate::types::TaskKey;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Declared tasks, deduplicated by (kind, name)
#[derive(Default)]
pub struct TaskSet {
    nodes: Vec<Box<dyn Node>>,
    index: HashMap<TaskKey, usize>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a task.
    ///
    /// Declaring an identical task again is a no-op; declaring a different
    /// task under the same key is a configuration error.
    pub fn add<T: Task>(&mut self, task: T) -> Result<()> {
        let node = TaskNode::new(task);
        let key = node.key();

        if let Some(&existing) = self.index.get(&key) {
            if self.nodes[existing].same_as(&node) {
                log::trace!("{key} declared again, keeping one");
                return Ok(());
            }
            return Err(Error::ConflictingDeclaration(key));
        }

        self.index.insert(key, self.nodes.len());
        self.nodes.push(Box::new(node));
        Ok(())
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys in declaration order
    pub fn keys(&self) -> Vec<TaskKey> {
        self.nodes.iter().map(|n| n.key()).collect()
    }

    /// Resolve dependencies and order the tasks.
    pub fn build(self) -> Result<TaskGraph> {
        let mut dependencies = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut deps = BTreeSet::new();
            for dep in node.dependencies() {
                let Some(&index) = self.index.get(&dep) else {
                    return Err(Error::DanglingDependency {
                        dependent: node.key(),
                        missing: dep,
                    });
                };
                deps.insert(index);
            }
            dependencies.push(deps.into_iter().collect::<Vec<_>>());
        }

        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (index, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(index);
            }
        }

        let order = topological_order(&dependencies, &dependents).map_err(|cycle| {
            Error::Cycle {
                nodes: cycle.into_iter().map(|i| self.nodes[i].key()).collect(),
            }
        })?;

        Ok(TaskGraph {
            nodes: self.nodes,
            index: self.index,
            dependencies,
            dependents,
            order,
        })
    }
}

/// Kahn's algorithm, ties broken by declaration order. On failure returns
/// one cycle, in dependency order.
fn topological_order(
    dependencies: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut waiting: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..waiting.len()).filter(|&i| waiting[i] == 0).collect();
    let mut order = Vec::with_capacity(waiting.len());

    while let Some(index) = ready.pop_first() {
        order.push(index);
        for &dependent in &dependents[index] {
            waiting[dependent] -= 1;
            if waiting[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == waiting.len() {
        return Ok(order);
    }

    // Every unordered node still waits on another unordered node, so walking
    // unordered dependencies must revisit a node.
    let Some(start) = (0..waiting.len()).find(|&i| waiting[i] > 0) else {
        return Ok(order);
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current].iter().find(|&&d| waiting[d] > 0) else {
            return Err(path);
        };
        if let Some(position) = path.iter().position(|&i| i == next) {
            return Err(path.split_off(position));
        }
        path.push(next);
        current = next;
    }
}

/// An immutable, acyclic task graph
pub struct TaskGraph {
    nodes: Vec<Box<dyn Node>>,
    index: HashMap<TaskKey, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("order", &self.order())
            .finish_non_exhaustive()
    }
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys in execution order: every task after all of its dependencies
    pub fn order(&self) -> Vec<TaskKey> {
        self.order.iter().map(|&i| self.nodes[i].key()).collect()
    }

    /// Direct dependencies of a task
    pub fn dependencies(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.index
            .get(key)
            .map(|&i| {
                self.dependencies[i]
                    .iter()
                    .map(|&d| self.nodes[d].key())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The declared task for `name`, if it is of type `T`
    pub fn task<T: Task>(&self, name: &str) -> Option<&T> {
        let index = *self.index.get(&TaskKey::new(T::KIND, name))?;
        self.nodes[index]
            .as_any()
            .downcast_ref::<TaskNode<T>>()
            .map(TaskNode::task)
    }

    /// Fail if any task that may render lacks a routine for `kind`.
    pub fn check_target(&self, kind: TargetKind) -> Result<()> {
        let tasks: Vec<TaskKey> = self
            .order
            .iter()
            .map(|&i| &self.nodes[i])
            .filter(|node| node.lifecycle().allows_mutation() && !node.supports(kind))
            .map(|node| node.key())
            .collect();

        if !tasks.is_empty() {
            return Err(Error::UnsupportedTarget { target: kind, tasks });
        }
        if kind == TargetKind::Terraform {
            self.check_terraform_names()?;
        }
        Ok(())
    }

    /// Every task type renders one resource type keyed by its sanitised
    /// name, so two tasks of a kind must not sanitise to the same name.
    fn check_terraform_names(&self) -> Result<()> {
        let mut by_name: BTreeMap<(&'static str, String), Vec<TaskKey>> = BTreeMap::new();
        for &i in &self.order {
            let node = &self.nodes[i];
            if !node.lifecycle().allows_mutation() {
                continue;
            }
            let key = node.key();
            by_name
                .entry((key.kind, terraform_name(&key.name)))
                .or_default()
                .push(key);
        }

        match by_name.into_iter().find(|(_, tasks)| tasks.len() > 1) {
            Some(((_, name), tasks)) => Err(Error::NameCollision { name, tasks }),
            None => Ok(()),
        }
    }

    pub(crate) fn node(&self, index: usize) -> &dyn Node {
        self.nodes[index].as_ref()
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn dependency_indices(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub(crate) fn dependent_indices(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Bucket, Instance, Network};
    use crate::types::Lifecycle;

    #[test]
    fn test_dependency_ordered_first_regardless_of_declaration() {
        let mut set = TaskSet::new();
        set.add(Instance::new("vm-1").on_network("net-1")).unwrap();
        set.add(Network::new("net-1")).unwrap();

        let graph = set.build().unwrap();
        assert_eq!(
            graph.order(),
            vec![TaskKey::new("Network", "net-1"), TaskKey::new("Instance", "vm-1")]
        );
        assert_eq!(
            graph.dependencies(&TaskKey::new("Instance", "vm-1")),
            vec![TaskKey::new("Network", "net-1")]
        );
    }

    #[test]
    fn test_identical_declarations_collapse() {
        let mut set = TaskSet::new();
        set.add(Network::new("net-1").with_cidr("10.0.0.0/16")).unwrap();
        set.add(Network::new("net-1").with_cidr("10.0.0.0/16")).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_conflicting_declarations_rejected() {
        let mut set = TaskSet::new();
        set.add(Network::new("net-1").with_cidr("10.0.0.0/16")).unwrap();
        let err = set
            .add(Network::new("net-1").with_cidr("10.9.0.0/16"))
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingDeclaration(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_same_name_different_kind_is_distinct() {
        let mut set = TaskSet::new();
        set.add(Network::new("main")).unwrap();
        set.add(Instance::new("main")).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_dangling_dependency() {
        let mut set = TaskSet::new();
        set.add(Instance::new("vm-1").on_network("missing")).unwrap();

        let Err(Error::DanglingDependency { dependent, missing }) = set.build() else {
            panic!("expected a dangling dependency error");
        };
        assert_eq!(dependent, TaskKey::new("Instance", "vm-1"));
        assert_eq!(missing, TaskKey::new("Network", "missing"));
    }

    #[test]
    fn test_cycle_reports_participants() {
        let mut set = TaskSet::new();
        set.add(Network::new("a").after("b")).unwrap();
        set.add(Network::new("b").after("c")).unwrap();
        set.add(Network::new("c").after("a")).unwrap();
        set.add(Instance::new("vm").on_network("a")).unwrap();

        let Err(Error::Cycle { nodes }) = set.build() else {
            panic!("expected a cycle error");
        };
        assert_eq!(nodes.len(), 3);
        for name in ["a", "b", "c"] {
            assert!(nodes.contains(&TaskKey::new("Network", name)));
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut set = TaskSet::new();
        set.add(Network::new("a").after("a")).unwrap();
        let Err(Error::Cycle { nodes }) = set.build() else {
            panic!("expected a cycle error");
        };
        assert_eq!(nodes, vec![TaskKey::new("Network", "a")]);
    }

    #[test]
    fn test_lookup_typed_task() {
        let mut set = TaskSet::new();
        set.add(Network::new("net-1").with_cidr("10.0.0.0/16")).unwrap();
        let graph = set.build().unwrap();

        let network = graph.task::<Network>("net-1").unwrap();
        assert_eq!(network.cidr.value().map(String::as_str), Some("10.0.0.0/16"));
        assert!(graph.task::<Instance>("net-1").is_none());
    }

    #[test]
    fn test_unsupported_target_detected_up_front() {
        let mut set = TaskSet::new();
        set.add(Network::new("net-1")).unwrap();
        set.add(Bucket::new("logs")).unwrap();
        let graph = set.build().unwrap();

        assert!(graph.check_target(TargetKind::Api).is_ok());
        let Err(Error::UnsupportedTarget { tasks, .. }) = graph.check_target(TargetKind::Terraform)
        else {
            panic!("expected unsupported target");
        };
        assert_eq!(tasks, vec![TaskKey::new("Bucket", "logs")]);
    }

    #[test]
    fn test_sanitised_name_collision_detected_for_terraform() {
        let mut set = TaskSet::new();
        set.add(Network::new("net.1")).unwrap();
        set.add(Network::new("net-1")).unwrap();
        set.add(Instance::new("net-1")).unwrap();
        let graph = set.build().unwrap();

        assert!(graph.check_target(TargetKind::Api).is_ok());
        let Err(Error::NameCollision { name, tasks }) = graph.check_target(TargetKind::Terraform)
        else {
            panic!("expected a name collision");
        };
        assert_eq!(name, "net-1");
        assert_eq!(
            tasks,
            vec![TaskKey::new("Network", "net.1"), TaskKey::new("Network", "net-1")]
        );
    }

    #[test]
    fn test_collision_ignored_for_tasks_that_never_render() {
        let mut set = TaskSet::new();
        set.add(Network::new("net.1").with_lifecycle(Lifecycle::Ignore))
            .unwrap();
        set.add(Network::new("net-1")).unwrap();
        let graph = set.build().unwrap();
        assert!(graph.check_target(TargetKind::Terraform).is_ok());
    }

    #[test]
    fn test_debug_lists_order() {
        let mut set = TaskSet::new();
        set.add(Network::new("net-1")).unwrap();
        let graph = set.build().unwrap();
        assert!(format!("{graph:?}").contains("net-1"));
    }
}
