//! Task graph: a validated dependency DAG built from workflow definitions.
//!
//! Tasks are addressed by `NodeIndex` handles into the graph owned by one
//! run; nothing looks tasks up through shared global state.

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};
use weavecore::template::{self, Placeholder};
use weavecore::storage;
use weavecore::{
    Arguments, DefinitionError, DefinitionProblem, DefinitionReport, NameKind, TaskId,
    WorkflowDefinition,
};

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub workflow: String,
    pub command: String,
    pub arguments: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub name: String,
    pub tasks: Vec<NodeIndex>,
}

/// Edges point from a dependency to the task that requires it.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<TaskId, NodeIndex>,
    modules: Vec<ModuleNode>,
    workflows: Vec<String>,
}

/// Module and task names end up in status file names and result
/// directories. `:` is reserved as the id separator, so a module can never
/// share an id with a task.
fn name_problem(kind: NameKind, name: &str) -> Option<DefinitionProblem> {
    let reason = if name.trim().is_empty() {
        "name is empty"
    } else if name.contains(':') {
        "':' separates module and task"
    } else if storage::validate_key(name).is_err() {
        "not usable as a file name"
    } else {
        return None;
    };
    Some(DefinitionProblem::InvalidName {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

impl TaskGraph {
    /// Validate `definitions` against `arguments` and build the graph.
    ///
    /// Every problem found is returned in one `DefinitionReport`. Cycle
    /// detection only runs once all dependency references resolve.
    pub fn build(
        definitions: &[WorkflowDefinition],
        arguments: &Arguments,
    ) -> Result<Self, DefinitionError> {
        let mut report = DefinitionReport::default();
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut modules: Vec<ModuleNode> = Vec::new();
        let mut module_names = HashSet::new();
        let mut pending_edges: Vec<(NodeIndex, String)> = Vec::new();

        for definition in definitions {
            for (position, module) in definition.modules.iter().enumerate() {
                if module.name.trim().is_empty() {
                    report.push(DefinitionProblem::EmptyModuleName {
                        workflow: definition.name.clone(),
                        index: position,
                    });
                    continue;
                }
                if let Some(problem) = name_problem(NameKind::Module, &module.name) {
                    report.push(problem);
                    continue;
                }
                if !module_names.insert(module.name.clone()) {
                    report.push(DefinitionProblem::DuplicateModule {
                        module: module.name.clone(),
                    });
                    continue;
                }
                if module.tasks.is_empty() {
                    report.push(DefinitionProblem::EmptyModule {
                        module: module.name.clone(),
                    });
                }

                let mut members = Vec::with_capacity(module.tasks.len());
                for task in &module.tasks {
                    if let Some(problem) = name_problem(NameKind::Task, &task.name) {
                        report.push(problem);
                        continue;
                    }
                    let id = TaskId::new(&module.name, &task.name);
                    if index.contains_key(&id) {
                        report.push(DefinitionProblem::DuplicateTask {
                            task: id.to_string(),
                        });
                        continue;
                    }
                    let command = task.command.clone().unwrap_or_default();
                    if command.trim().is_empty() {
                        report.push(DefinitionProblem::MissingCommand {
                            task: id.to_string(),
                        });
                    }

                    let idx = graph.add_node(TaskNode {
                        id: id.clone(),
                        workflow: definition.name.clone(),
                        command,
                        arguments: task.arguments.clone(),
                    });
                    index.insert(id, idx);
                    members.push(idx);
                    for dep in &task.requires {
                        pending_edges.push((idx, dep.clone()));
                    }
                }
                modules.push(ModuleNode {
                    name: module.name.clone(),
                    tasks: members,
                });
            }
        }

        let mut unresolved = false;
        for (idx, reference) in pending_edges {
            let owner = graph[idx].id.clone();
            let dep_id = TaskId::resolve_reference(&owner.module, &reference);
            match index.get(&dep_id) {
                Some(&dep_idx) => {
                    if graph.find_edge(dep_idx, idx).is_none() {
                        graph.add_edge(dep_idx, idx, ());
                    }
                }
                None => {
                    unresolved = true;
                    report.push(DefinitionProblem::UnresolvedDependency {
                        task: owner.to_string(),
                        dependency: dep_id.to_string(),
                    });
                }
            }
        }

        let mut built = Self {
            graph,
            index,
            modules,
            workflows: definitions.iter().map(|d| d.name.clone()).collect(),
        };

        if !unresolved {
            for cycle in built.find_cycles() {
                report.push(DefinitionProblem::Cycle { tasks: cycle });
            }
        }
        built.check_placeholders(arguments, &mut report);

        report.into_result()?;
        built.modules.retain(|m| !m.tasks.is_empty());
        Ok(built)
    }

    /// Depth-first search tracking in-progress nodes. Each back edge found
    /// yields the ids along the cycle, closing on the first id.
    fn find_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Finished,
        }

        fn visit(
            graph: &DiGraph<TaskNode, ()>,
            node: NodeIndex,
            marks: &mut [Mark],
            path: &mut Vec<NodeIndex>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            marks[node.index()] = Mark::InProgress;
            path.push(node);
            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                match marks[next.index()] {
                    Mark::Unvisited => visit(graph, next, marks, path, cycles),
                    Mark::InProgress => {
                        let start = path.iter().position(|n| *n == next).unwrap_or(0);
                        let mut ids: Vec<String> =
                            path[start..].iter().map(|n| graph[*n].id.to_string()).collect();
                        ids.push(graph[next].id.to_string());
                        cycles.push(ids);
                    }
                    Mark::Finished => {}
                }
            }
            path.pop();
            marks[node.index()] = Mark::Finished;
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut cycles = Vec::new();
        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::Unvisited {
                visit(&self.graph, node, &mut marks, &mut Vec::new(), &mut cycles);
            }
        }
        cycles
    }

    fn check_placeholders(&self, arguments: &Arguments, report: &mut DefinitionReport) {
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for idx in self.graph.node_indices() {
            let task = &self.graph[idx];
            for placeholder in template::placeholders(&task.command) {
                match placeholder {
                    Placeholder::Argument(name) => {
                        if arguments.resolve(&name, &task.arguments).is_none() {
                            missing.entry(name).or_default().push(task.id.to_string());
                        }
                    }
                    Placeholder::Output(reference) => {
                        let target = reference
                            .parse::<TaskId>()
                            .ok()
                            .and_then(|id| self.index.get(&id).copied());
                        match target {
                            None => report.push(DefinitionProblem::UnknownOutputReference {
                                task: task.id.to_string(),
                                reference,
                            }),
                            Some(dep) if dep == idx || !self.is_upstream(dep, idx) => {
                                report.push(DefinitionProblem::OutputNotUpstream {
                                    task: task.id.to_string(),
                                    reference,
                                })
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }

        for (argument, tasks) in missing {
            report.push(DefinitionProblem::MissingArgument { argument, tasks });
        }
    }

    /// True when `upstream` must finish before `downstream` may start.
    pub fn is_upstream(&self, upstream: NodeIndex, downstream: NodeIndex) -> bool {
        upstream != downstream && has_path_connecting(&self.graph, upstream, downstream, None)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn workflows(&self) -> &[String] {
        &self.workflows
    }

    pub fn task_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn task(&self, idx: NodeIndex) -> &TaskNode {
        &self.graph[idx]
    }

    pub fn find(&self, id: &TaskId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn dependencies(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    pub fn dependents(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    pub fn modules(&self) -> &[ModuleNode] {
        &self.modules
    }

    pub fn module_position(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }

    /// Substitute arguments, then dependency output paths, in a task's command.
    pub fn render_command<F>(
        &self,
        idx: NodeIndex,
        arguments: &Arguments,
        mut output_path: F,
    ) -> Result<String, Vec<Placeholder>>
    where
        F: FnMut(&TaskId) -> Option<String>,
    {
        let task = &self.graph[idx];
        template::render(&task.command, |placeholder| match placeholder {
            Placeholder::Argument(name) => arguments
                .resolve(name, &task.arguments)
                .map(str::to_string),
            Placeholder::Output(reference) => reference
                .parse::<TaskId>()
                .ok()
                .and_then(|id| output_path(&id)),
        })
    }
}
