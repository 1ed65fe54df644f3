//! Dependency graph construction and ordering.
//!
//! Stage B depends on stage A when the dependency map says so, or
//! implicitly when B reads a variable A writes. The merged graph must be
//! acyclic; it is ordered topologically with ties broken by declaration
//! order, so independent stages run in the order they were listed.

use crate::errors::{CycleError, DefinitionError};
use crate::stages::EtlStage;
use crate::variables::SlotRole;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

/// Stage name to the names of the stages it depends on.
pub type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// Returns the "depended-on-by" view of a dependency map.
///
/// Every stage named anywhere in `map` appears as a key, with an empty set
/// when nothing depends on it.
#[must_use]
pub fn invert_dependency_map(map: &DependencyMap) -> DependencyMap {
    let mut inverted = DependencyMap::new();
    for (stage, deps) in map {
        inverted.entry(stage.clone()).or_default();
        for dep in deps {
            inverted.entry(dep.clone()).or_default().insert(stage.clone());
        }
    }
    inverted
}

/// The validated, ordered dependency graph of a pipeline's top-level stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    execution_order: Vec<String>,
    dependencies: DependencyMap,
    implicit: DependencyMap,
}

impl DependencyGraph {
    /// Builds and orders the graph.
    ///
    /// Explicit dependencies may name nested stages; they are attributed to
    /// the top-level stage that owns them. Nested stages contribute to
    /// implicit edges through their owner (see
    /// [`EtlStage::visible_outputs`] and [`EtlStage::external_inputs`]).
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::UnknownDependency`] for an explicit edge
    /// naming a stage that does not exist, or [`DefinitionError::Cycle`]
    /// when the merged edges are cyclic.
    pub fn build(
        stages: &[EtlStage],
        explicit: &DependencyMap,
        loop_index_variable: &str,
    ) -> Result<Self, DefinitionError> {
        let index: HashMap<&str, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name(), i))
            .collect();
        let owner = owner_map(stages);

        let mut dependencies: DependencyMap = stages
            .iter()
            .map(|s| (s.name().to_string(), BTreeSet::new()))
            .collect();

        for (stage, deps) in explicit {
            let Some(&stage_owner) = owner.get(stage.as_str()) else {
                return Err(DefinitionError::UnknownDependency {
                    stage: stage.clone(),
                    dependency: stage.clone(),
                });
            };
            for dep in deps {
                let Some(&dep_owner) = owner.get(dep.as_str()) else {
                    return Err(DefinitionError::UnknownDependency {
                        stage: stage.clone(),
                        dependency: dep.clone(),
                    });
                };
                if stage_owner == dep_owner && stage != dep {
                    check_nested_order(stages, stage_owner, stage, dep)?;
                    continue;
                }
                dependencies
                    .entry(stage_owner.to_string())
                    .or_default()
                    .insert(dep_owner.to_string());
            }
        }

        let implicit = implicit_edges(stages, loop_index_variable);
        for (stage, deps) in &implicit {
            dependencies
                .entry(stage.clone())
                .or_default()
                .extend(deps.iter().cloned());
        }

        let execution_order = topological_order(stages, &index, &dependencies)?;
        tracing::debug!(order = ?execution_order, "Dependency graph ordered");

        Ok(Self {
            execution_order,
            dependencies,
            implicit,
        })
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns the merged dependencies of every top-level stage.
    #[must_use]
    pub fn dependencies(&self) -> &DependencyMap {
        &self.dependencies
    }

    /// Returns the merged dependencies of one stage.
    #[must_use]
    pub fn dependencies_of(&self, stage: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(stage)
    }

    /// Returns only the dependencies inferred from variable names.
    #[must_use]
    pub fn implicit_dependencies(&self) -> &DependencyMap {
        &self.implicit
    }
}

/// Maps every stage name in the tree to the name of its top-level owner.
fn owner_map(stages: &[EtlStage]) -> HashMap<&str, &str> {
    let mut owner = HashMap::new();
    for top in stages {
        for nested in top.all_stages() {
            owner.insert(nested.name(), top.name());
        }
    }
    owner
}

/// Two stages under one owner run in tree declaration order, so an explicit
/// edge between them holds only when the dependency is declared first.
fn check_nested_order(
    stages: &[EtlStage],
    owner: &str,
    stage: &str,
    dependency: &str,
) -> Result<(), DefinitionError> {
    let Some(top) = stages.iter().find(|s| s.name() == owner) else {
        return Ok(());
    };
    let tree = top.all_stages();
    let position = |name: &str| tree.iter().position(|s| s.name() == name);
    match (position(stage), position(dependency)) {
        (Some(s), Some(d)) if d > s => Err(DefinitionError::NestedOrderConflict {
            stage: stage.to_string(),
            dependency: dependency.to_string(),
            owner: owner.to_string(),
        }),
        _ => Ok(()),
    }
}

/// B depends on A when B reads a name A writes. A producer always counts; a
/// transformer only when declared before B, so chains of transformers on
/// one name follow declaration order instead of forming cycles.
fn implicit_edges(stages: &[EtlStage], loop_index_variable: &str) -> DependencyMap {
    let outputs: Vec<Vec<(String, SlotRole)>> =
        stages.iter().map(EtlStage::visible_outputs).collect();

    let mut edges = DependencyMap::new();
    for (j, consumer) in stages.iter().enumerate() {
        for (name, _) in consumer.external_inputs(loop_index_variable) {
            for (i, producer) in stages.iter().enumerate() {
                if i == j {
                    continue;
                }
                let writes = outputs[i].iter().find(|(n, _)| *n == name);
                let counts = match writes {
                    Some((_, SlotRole::Produce)) => true,
                    Some((_, SlotRole::Transform)) => i < j,
                    _ => false,
                };
                if counts {
                    edges
                        .entry(consumer.name().to_string())
                        .or_default()
                        .insert(producer.name().to_string());
                }
            }
        }
    }
    edges
}

/// Kahn's algorithm, always picking the ready stage declared first.
fn topological_order(
    stages: &[EtlStage],
    index: &HashMap<&str, usize>,
    dependencies: &DependencyMap,
) -> Result<Vec<String>, CycleError> {
    let n = stages.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (stage, deps) in dependencies {
        let Some(&s) = index.get(stage.as_str()) else {
            continue;
        };
        for dep in deps {
            if let Some(&d) = index.get(dep.as_str()) {
                in_degree[s] += 1;
                dependents[d].push(s);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(stages[i].name().to_string());
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < n {
        let remaining: Vec<&str> = stages
            .iter()
            .map(EtlStage::name)
            .filter(|name| !order.iter().any(|o| o == name))
            .collect();
        return Err(CycleError::new(find_cycle(&remaining, index, dependencies)));
    }
    Ok(order)
}

/// Finds one cycle among stages left over by the topological sort.
fn find_cycle(
    remaining: &[&str],
    index: &HashMap<&str, usize>,
    dependencies: &DependencyMap,
) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    let mut path = Vec::new();

    for start in remaining {
        if let Some(cycle) = dfs_cycle(start, index, dependencies, &mut visited, &mut on_path, &mut path) {
            return cycle;
        }
    }
    remaining.iter().map(|s| (*s).to_string()).collect()
}

fn dfs_cycle(
    node: &str,
    index: &HashMap<&str, usize>,
    dependencies: &DependencyMap,
    visited: &mut HashSet<String>,
    on_path: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    if on_path.contains(node) {
        let start = path.iter().position(|n| n == node).unwrap_or(0);
        let mut cycle = path[start..].to_vec();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if !visited.insert(node.to_string()) {
        return None;
    }
    on_path.insert(node.to_string());
    path.push(node.to_string());

    if let Some(deps) = dependencies.get(node) {
        let mut ordered: Vec<&String> = deps.iter().filter(|d| index.contains_key(d.as_str())).collect();
        ordered.sort_by_key(|d| index.get(d.as_str()).copied().unwrap_or(usize::MAX));
        for dep in ordered {
            if let Some(cycle) = dfs_cycle(dep, index, dependencies, visited, on_path, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    on_path.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{LoopPredicate, StageLoop};
    use crate::variables::VariableSlot;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, &[&str])]) -> DependencyMap {
        pairs
            .iter()
            .map(|(k, vs)| {
                (
                    (*k).to_string(),
                    vs.iter().map(|v| (*v).to_string()).collect(),
                )
            })
            .collect()
    }

    fn order(stages: &[EtlStage], explicit: &DependencyMap) -> Vec<String> {
        DependencyGraph::build(stages, explicit, "iteration")
            .unwrap()
            .execution_order()
            .to_vec()
    }

    #[test]
    fn test_implicit_order_from_variables() {
        let stages = vec![
            EtlStage::new("save").consumes("clean"),
            EtlStage::new("clean").consumes("raw").produces("clean"),
            EtlStage::new("load").produces("raw"),
        ];
        assert_eq!(order(&stages, &DependencyMap::new()), vec!["load", "clean", "save"]);
    }

    #[test]
    fn test_independent_stages_keep_declaration_order() {
        let stages = vec![EtlStage::new("c"), EtlStage::new("a"), EtlStage::new("b")];
        assert_eq!(order(&stages, &DependencyMap::new()), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_explicit_edges_are_merged() {
        let stages = vec![EtlStage::new("report"), EtlStage::new("fetch")];
        let explicit = map(&[("report", &["fetch"])]);
        assert_eq!(order(&stages, &explicit), vec!["fetch", "report"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let stages = vec![
            EtlStage::new("a").produces("x"),
            EtlStage::new("b").consumes("x").produces("y"),
            EtlStage::new("c").consumes("x"),
            EtlStage::new("d").consumes("y"),
        ];
        let first = order(&stages, &DependencyMap::new());
        for _ in 0..10 {
            assert_eq!(order(&stages, &DependencyMap::new()), first);
        }
        assert_eq!(first, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_all_producers_of_a_name_are_dependencies() {
        let stages = vec![
            EtlStage::new("primary").produces("rows"),
            EtlStage::new("backup").with_slot(VariableSlot::produce("rows").force_overwrite()),
            EtlStage::new("merge").consumes("rows"),
        ];
        let graph = DependencyGraph::build(&stages, &DependencyMap::new(), "iteration").unwrap();
        let deps: Vec<&String> = graph.dependencies_of("merge").unwrap().iter().collect();
        assert_eq!(deps, vec!["backup", "primary"]);
    }

    #[test]
    fn test_transform_chain_follows_declaration_order() {
        let stages = vec![
            EtlStage::new("load").produces("rows"),
            EtlStage::new("dedupe").transforms("rows"),
            EtlStage::new("sort").transforms("rows"),
            EtlStage::new("save").consumes("rows"),
        ];
        assert_eq!(
            order(&stages, &DependencyMap::new()),
            vec!["load", "dedupe", "sort", "save"]
        );
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let stages = vec![
            EtlStage::new("a").consumes("z").produces("x"),
            EtlStage::new("b").consumes("x").produces("y"),
            EtlStage::new("c").consumes("y").produces("z"),
        ];
        let err = DependencyGraph::build(&stages, &DependencyMap::new(), "iteration").unwrap_err();
        let DefinitionError::Cycle(cycle) = err else {
            panic!("expected a cycle");
        };
        assert_eq!(cycle.cycle_path, vec!["a", "c", "b", "a"]);
    }

    #[test]
    fn test_explicit_self_dependency_is_a_cycle() {
        let stages = vec![EtlStage::new("solo")];
        let err = DependencyGraph::build(&stages, &map(&[("solo", &["solo"])]), "iteration")
            .unwrap_err();
        assert_eq!(err.code(), "DEFINITION-CYCLE");
    }

    #[test]
    fn test_unknown_dependency() {
        let stages = vec![EtlStage::new("a")];
        let err = DependencyGraph::build(&stages, &map(&[("a", &["ghost"])]), "iteration")
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownDependency {
                stage: "a".to_string(),
                dependency: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_nested_stages_contribute_through_their_owner() {
        let stages = vec![
            EtlStage::new("report").consumes("items"),
            StageLoop::new(
                [
                    EtlStage::new("fetch_page").consumes("iteration").produces("page"),
                    EtlStage::new("collect")
                        .consumes("page")
                        .with_slot(VariableSlot::produce("items").propagate().force_overwrite()),
                ],
                LoopPredicate::variable("has_more"),
            )
            .into_stage(),
        ];
        assert_eq!(
            order(&stages, &DependencyMap::new()),
            vec!["loop_fetch_page_collect_etc", "report"]
        );
    }

    #[test]
    fn test_explicit_dependency_on_nested_stage_maps_to_owner() {
        let stages = vec![
            EtlStage::new("after"),
            EtlStage::new("group").with_sub_stages([EtlStage::new("inner")]),
        ];
        let explicit = map(&[("after", &["inner"])]);
        assert_eq!(order(&stages, &explicit), vec!["group", "after"]);
    }

    #[test]
    fn test_explicit_dependency_between_siblings_follows_declaration() {
        let stages = vec![
            EtlStage::new("report"),
            EtlStage::new("group")
                .with_sub_stages([EtlStage::new("first"), EtlStage::new("second")]),
        ];
        let explicit = map(&[("second", &["first"]), ("group", &[])]);
        let graph = DependencyGraph::build(&stages, &explicit, "iteration").unwrap();
        assert_eq!(graph.execution_order().to_vec(), vec!["report", "group"]);
        assert!(graph.dependencies_of("group").unwrap().is_empty());
    }

    #[test]
    fn test_explicit_dependency_against_sibling_order_is_rejected() {
        let stages = vec![EtlStage::new("group")
            .with_sub_stages([EtlStage::new("first"), EtlStage::new("second")])];
        let err = DependencyGraph::build(&stages, &map(&[("first", &["second"])]), "iteration")
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::NestedOrderConflict {
                stage: "first".to_string(),
                dependency: "second".to_string(),
                owner: "group".to_string(),
            }
        );
        assert_eq!(err.code(), "DEFINITION-NESTED-ORDER-CONFLICT");
    }

    #[test]
    fn test_invert_dependency_map() {
        let deps = map(&[("clean", &["load"]), ("save", &["clean", "load"]), ("load", &[])]);
        let inverted = invert_dependency_map(&deps);
        assert_eq!(
            inverted,
            map(&[("load", &["clean", "save"]), ("clean", &["save"]), ("save", &[])])
        );
    }
}
