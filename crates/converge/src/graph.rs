//! Dependency graph construction.
//!
//! Model builders register tasks into a [`GraphBuilder`]. Sealing it checks
//! every dependency edge, orders the tasks topologically and freezes the
//! result into an immutable [`Graph`].

use crate::error::{Error, Result};
use crate::task::{DynTask, Task, TaskKey};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Accumulates tasks before the graph is sealed.
pub struct GraphBuilder<C: ?Sized> {
    tasks: BTreeMap<TaskKey, Box<dyn DynTask<C>>>,
}

/// What model builders receive: a graph builder that can only be added to.
pub type ModelBuilderContext<C> = GraphBuilder<C>;

/// Contributes one area of the model (network, IAM, ...) to the graph.
pub trait ModelBuilder<C: ?Sized> {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Register this builder's tasks
    fn build(&self, ctx: &mut ModelBuilderContext<C>) -> Result<()>;
}

impl<C: ?Sized + Sync> Default for GraphBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized + Sync> GraphBuilder<C> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Register a task. Its key must not be registered yet.
    pub fn add_task<T: Task<C>>(&mut self, task: T) -> Result<TaskKey> {
        let key = Task::key(&task);
        if self.tasks.contains_key(&key) {
            return Err(Error::DuplicateTask { key });
        }
        log::trace!("Registered {key}");
        self.tasks.insert(key.clone(), Box::new(task));
        Ok(key)
    }

    /// Register a task unless an equal one is already registered.
    ///
    /// Several builders may need the same shared object; registering it
    /// twice is fine as long as both definitions agree.
    pub fn ensure_task<T: Task<C>>(&mut self, task: T) -> Result<TaskKey> {
        let key = Task::key(&task);
        match self.tasks.get(&key) {
            Some(existing) if existing.same_as(&task) => Ok(key),
            Some(_) => Err(Error::DuplicateTask { key }),
            None => {
                self.tasks.insert(key.clone(), Box::new(task));
                Ok(key)
            }
        }
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate the edges and order the tasks.
    pub fn seal(self) -> Result<Graph<C>> {
        // edges point from a dependency to its dependent
        let mut dag: DiGraph<TaskKey, ()> = DiGraph::with_capacity(self.tasks.len(), 0);
        let slots: BTreeMap<TaskKey, NodeIndex> = self
            .tasks
            .keys()
            .map(|key| (key.clone(), dag.add_node(key.clone())))
            .collect();
        for (key, task) in &self.tasks {
            let mut deps = task.dependencies();
            deps.sort();
            deps.dedup();
            for dep in deps {
                let Some(&from) = slots.get(&dep) else {
                    return Err(Error::DanglingDependency {
                        task: key.clone(),
                        missing: dep,
                    });
                };
                dag.add_edge(from, slots[key], ());
            }
        }

        let order = topological_order(&dag)?;

        // Re-index so node positions follow execution order.
        let mut tasks = self.tasks;
        let mut sorted: DiGraph<TaskKey, ()> = DiGraph::with_capacity(order.len(), dag.edge_count());
        let mut moved = vec![NodeIndex::end(); dag.node_count()];
        let mut nodes = Vec::with_capacity(order.len());
        let mut index = BTreeMap::new();
        for &old in &order {
            let key = dag[old].clone();
            let new = sorted.add_node(key.clone());
            moved[old.index()] = new;
            index.insert(key.clone(), new.index());
            if let Some(task) = tasks.remove(&key) {
                nodes.push(task);
            }
        }
        for edge in dag.raw_edges() {
            sorted.add_edge(moved[edge.source().index()], moved[edge.target().index()], ());
        }

        log::debug!("Sealed graph with {} task(s)", nodes.len());
        Ok(Graph {
            nodes,
            index,
            dag: sorted,
        })
    }
}

/// Topological order of `dag`, sources first.
///
/// On a cycle, every member of the offending strongly connected component
/// is reported, sorted by key.
pub(crate) fn topological_order(dag: &DiGraph<TaskKey, ()>) -> Result<Vec<NodeIndex>> {
    toposort(dag, None).map_err(|cycle| {
        let at = cycle.node_id();
        let components = tarjan_scc(dag);
        let cyclic = |component: &&Vec<NodeIndex>| {
            component.len() > 1 || dag.contains_edge(component[0], component[0])
        };
        let mut members: Vec<TaskKey> = components
            .iter()
            .filter(cyclic)
            .find(|component| component.contains(&at))
            .or_else(|| components.iter().find(cyclic))
            .map(|component| component.iter().map(|&i| dag[i].clone()).collect())
            .unwrap_or_else(|| vec![dag[at].clone()]);
        members.sort();
        Error::CycleDetected { members }
    })
}

/// Run every model builder, then seal.
pub fn build_graph<C: ?Sized + Sync>(builders: &[&dyn ModelBuilder<C>]) -> Result<Graph<C>> {
    let mut ctx = ModelBuilderContext::new();
    for builder in builders {
        let before = ctx.len();
        builder.build(&mut ctx)?;
        log::debug!(
            "Model builder {} registered {} task(s)",
            builder.name(),
            ctx.len() - before
        );
    }
    ctx.seal()
}

/// Immutable, topologically ordered task graph.
pub struct Graph<C: ?Sized> {
    nodes: Vec<Box<dyn DynTask<C>>>,
    index: BTreeMap<TaskKey, usize>,
    /// Node `i` is `nodes[i]`; edges run from dependency to dependent
    dag: DiGraph<TaskKey, ()>,
}

impl<C: ?Sized> Graph<C> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys in execution order; every task follows its dependencies.
    pub fn order(&self) -> Vec<TaskKey> {
        self.nodes.iter().map(|n| n.key()).collect()
    }

    pub fn get(&self, key: &TaskKey) -> Option<&dyn DynTask<C>> {
        self.index.get(key).map(|&i| self.nodes[i].as_ref())
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.index.contains_key(key)
    }

    /// Iterate over tasks in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &dyn DynTask<C>> {
        self.nodes.iter().map(AsRef::as_ref)
    }

    pub fn dependencies_of(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.neighbours(key, Direction::Incoming)
    }

    pub fn dependents_of(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.neighbours(key, Direction::Outgoing)
    }

    fn neighbours(&self, key: &TaskKey, direction: Direction) -> Vec<TaskKey> {
        self.index
            .get(key)
            .map(|&i| {
                self.adjacent(i, direction)
                    .into_iter()
                    .map(|j| self.nodes[j].key())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Positions adjacent to `i`, in execution order.
    fn adjacent(&self, i: usize, direction: Direction) -> Vec<usize> {
        let mut adjacent: Vec<usize> = self
            .dag
            .neighbors_directed(NodeIndex::new(i), direction)
            .map(NodeIndex::index)
            .collect();
        adjacent.sort_unstable();
        adjacent
    }

    /// Every task that depends on `key`, directly or not.
    pub fn transitive_dependents(&self, key: &TaskKey) -> BTreeSet<TaskKey> {
        let Some(&start) = self.index.get(key) else {
            return BTreeSet::new();
        };
        self.transitive_dependent_indices(start)
            .into_iter()
            .map(|i| self.nodes[i].key())
            .collect()
    }

    pub(crate) fn transitive_dependent_indices(&self, start: usize) -> BTreeSet<usize> {
        let mut bfs = Bfs::new(&self.dag, NodeIndex::new(start));
        let mut seen = BTreeSet::new();
        while let Some(i) = bfs.next(&self.dag) {
            if i.index() != start {
                seen.insert(i.index());
            }
        }
        seen
    }

    pub(crate) fn node(&self, i: usize) -> &dyn DynTask<C> {
        self.nodes[i].as_ref()
    }

    pub(crate) fn dependency_indices(&self, i: usize) -> Vec<usize> {
        self.adjacent(i, Direction::Incoming)
    }

    pub(crate) fn dependent_indices(&self, i: usize) -> Vec<usize> {
        self.adjacent(i, Direction::Outgoing)
    }

    /// Graphviz rendering, edges pointing from a task to its dependencies.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph tasks {\n  rankdir=LR;\n");
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = writeln!(out, "  \"{}\";", node.key());
            for d in self.dependency_indices(i) {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", node.key(), self.nodes[d].key());
            }
        }
        out.push_str("}\n");
        out
    }
}
