//! Graph executor: DAG fast path and bounded cyclic execution.
//!
//! Each execution classifies edges by depth-first traversal. Acyclic graphs
//! run a topological pass with port-gated edge firing; graphs with back-edges
//! run a FIFO ready-queue pass bounded by `max_iterations`, with per-node
//! visit caps and separate bookkeeping for cycle participants.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::component::ComponentRegistry;
use crate::config::{EdgeConfig, ErrorPolicy, FlowConfig, MaxIterationsPolicy};
use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::hooks::HookDispatcher;

use super::{
    check_deadline_between_steps, run_step, StepInvocation, REASON_ERROR_POLICY,
    REASON_UNREACHABLE,
};

/// Edge classification and adjacency for one execution
struct Topology {
    /// Edge indexes grouped by source node index
    outgoing: Vec<Vec<usize>>,
    /// Edge indexes grouped by target node index
    incoming: Vec<Vec<usize>>,
    /// Node index by node id
    index_of: HashMap<String, usize>,
    /// Edge indexes whose target was on the traversal stack
    back_edges: HashSet<usize>,
    /// Node indexes that sit on at least one cycle
    cycle_members: HashSet<usize>,
}

impl Topology {
    fn build(config: &FlowConfig) -> Topology {
        let n = config.nodes.len();
        let mut index_of = HashMap::with_capacity(n);
        for (index, node) in config.nodes.iter().enumerate() {
            index_of.insert(node.id.clone(), index);
        }

        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        for (edge_index, edge) in config.edges.iter().enumerate() {
            let source = index_of[edge.source.as_str()];
            let target = index_of[edge.target.as_str()];
            outgoing[source].push(edge_index);
            incoming[target].push(edge_index);
        }

        let back_edges = classify_back_edges(config, &outgoing, &index_of);
        let cycle_members = find_cycle_members(&outgoing, config, &index_of);

        Topology {
            outgoing,
            incoming,
            index_of,
            back_edges,
            cycle_members,
        }
    }

    fn is_cyclic(&self) -> bool {
        !self.back_edges.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// White/gray/black depth-first classification; an edge into a gray node is
/// a back-edge.
fn classify_back_edges(
    config: &FlowConfig,
    outgoing: &[Vec<usize>],
    index_of: &HashMap<String, usize>,
) -> HashSet<usize> {
    let n = config.nodes.len();
    let mut color = vec![Color::White; n];
    let mut back_edges = HashSet::new();

    for start in 0..n {
        if color[start] != Color::White {
            continue;
        }
        color[start] = Color::Gray;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some((node, edge_cursor)) = stack.pop() {
            if edge_cursor < outgoing[node].len() {
                let edge_index = outgoing[node][edge_cursor];
                stack.push((node, edge_cursor + 1));
                let target = index_of[config.edges[edge_index].target.as_str()];
                match color[target] {
                    Color::White => {
                        color[target] = Color::Gray;
                        stack.push((target, 0));
                    }
                    Color::Gray => {
                        back_edges.insert(edge_index);
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
            }
        }
    }

    back_edges
}

/// A node participates in a cycle when it can reach itself.
fn find_cycle_members(
    outgoing: &[Vec<usize>],
    config: &FlowConfig,
    index_of: &HashMap<String, usize>,
) -> HashSet<usize> {
    let n = config.nodes.len();
    let mut members = HashSet::new();

    for node in 0..n {
        let mut seen = vec![false; n];
        let mut frontier: Vec<usize> = outgoing[node]
            .iter()
            .map(|&e| index_of[config.edges[e].target.as_str()])
            .collect();
        while let Some(current) = frontier.pop() {
            if current == node {
                members.insert(node);
                break;
            }
            if seen[current] {
                continue;
            }
            seen[current] = true;
            frontier.extend(
                outgoing[current]
                    .iter()
                    .map(|&e| index_of[config.edges[e].target.as_str()]),
            );
        }
    }

    members
}

/// Whether an edge fires given the source's active port
fn edge_fires(edge: &EdgeConfig, active_port: Option<&str>) -> bool {
    match (&edge.port, active_port) {
        (None, _) => true,
        (Some(required), Some(active)) => required == active,
        (Some(_), None) => false,
    }
}

/// Dispatch on cycle structure.
pub(crate) async fn execute(
    config: &FlowConfig,
    registry: &ComponentRegistry,
    hooks: &HookDispatcher,
    ctx: &mut Context,
) -> FlowResult<()> {
    let topology = Topology::build(config);
    if topology.is_cyclic() {
        execute_cyclic(config, &topology, registry, hooks, ctx).await
    } else {
        execute_dag(config, &topology, registry, hooks, ctx).await
    }
}

/// Topological order with declaration-order tie-break. Only valid on DAGs.
fn kahn_order(config: &FlowConfig, topology: &Topology) -> Vec<usize> {
    let n = config.nodes.len();
    let mut in_degree: Vec<usize> = topology.incoming.iter().map(Vec::len).collect();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    for _ in 0..n {
        let next = (0..n)
            .find(|&i| !placed[i] && in_degree[i] == 0)
            .expect("acyclic graph has a node of in-degree zero");
        placed[next] = true;
        order.push(next);
        for &edge_index in &topology.outgoing[next] {
            let target = topology.index_of[config.edges[edge_index].target.as_str()];
            in_degree[target] -= 1;
        }
    }

    order
}

/// The acyclic fast path: one pass over the topological order.
async fn execute_dag(
    config: &FlowConfig,
    topology: &Topology,
    registry: &ComponentRegistry,
    hooks: &HookDispatcher,
    ctx: &mut Context,
) -> FlowResult<()> {
    let order = kahn_order(config, topology);
    let mut fired = vec![false; config.edges.len()];
    let completed_before = ctx.metadata.completed_nodes.clone();

    for node_index in order {
        let node = &config.nodes[node_index];
        let id = node.id.as_str();

        let reachable = topology.incoming[node_index].is_empty()
            || topology.incoming[node_index].iter().any(|&e| fired[e]);
        if !reachable {
            ctx.metadata.record_skip(id);
            hooks.node_skipped(id, ctx, REASON_UNREACHABLE).await;
            continue;
        }

        if completed_before.contains(id) {
            // Completed before suspension; the node does not re-execute and
            // its downstream edges are treated as satisfied.
            for &edge_index in &topology.outgoing[node_index] {
                fired[edge_index] = true;
            }
            continue;
        }

        check_deadline_between_steps(ctx, id)?;
        ctx.clear_active_port();

        let component = registry.get(&node.component_name).ok_or_else(|| {
            FlowError::configuration(format!(
                "component '{}' is not registered",
                node.component_name
            ))
        })?;

        let result = run_step(
            StepInvocation {
                step_index: node_index,
                label: id,
                component_name: &node.component_name,
                component,
                timeout_mode: config.settings.timeout_mode,
            },
            ctx,
            hooks,
        )
        .await;

        match result {
            Ok(()) => {
                if ctx.is_suspended() {
                    return Ok(());
                }
                ctx.metadata.completed_nodes.insert(id.to_string());
                let active_port = ctx.active_port().map(str::to_string);
                for &edge_index in &topology.outgoing[node_index] {
                    fired[edge_index] =
                        edge_fires(&config.edges[edge_index], active_port.as_deref());
                }
            }
            Err(error) => {
                if error.is_fatal() {
                    return Err(error);
                }
                ctx.metadata
                    .record_error(&node.component_name, &error.to_string(), error.category());
                match config.error_policy(node.on_error) {
                    ErrorPolicy::Fail => return Err(error),
                    ErrorPolicy::Skip => {
                        ctx.metadata.record_skip(id);
                        hooks.node_skipped(id, ctx, REASON_ERROR_POLICY).await;
                        // Outgoing edges stay unfired, so nodes reachable only
                        // through this one fall out as unreachable.
                    }
                    ErrorPolicy::Continue => {
                        ctx.metadata.completed_nodes.insert(id.to_string());
                        for &edge_index in &topology.outgoing[node_index] {
                            fired[edge_index] = config.edges[edge_index].port.is_none();
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Whether the cyclic pass should keep draining the queue
enum Continuation {
    Continue,
    Stop,
}

/// Fire a node's outgoing edges, accounting back-edge traversals against the
/// iteration budget.
fn fire_outgoing(
    config: &FlowConfig,
    topology: &Topology,
    node_index: usize,
    active_port: Option<&str>,
    queue: &mut VecDeque<usize>,
    ctx: &mut Context,
) -> FlowResult<Continuation> {
    let max_iterations = config.settings.max_iterations;

    for &edge_index in &topology.outgoing[node_index] {
        let edge = &config.edges[edge_index];
        if !edge_fires(edge, active_port) {
            continue;
        }
        let target = topology.index_of[edge.target.as_str()];

        if topology.back_edges.contains(&edge_index) {
            ctx.metadata.iteration_count += 1;
            if ctx.metadata.iteration_count >= max_iterations {
                match config.settings.on_max_iterations {
                    MaxIterationsPolicy::Fail => {
                        return Err(FlowError::MaxIterations {
                            max_iterations,
                            actual_iterations: ctx.metadata.iteration_count,
                            cycle_entry_node: edge.target.clone(),
                        });
                    }
                    MaxIterationsPolicy::Exit => {
                        ctx.metadata.max_iterations_reached = true;
                        return Ok(Continuation::Stop);
                    }
                    MaxIterationsPolicy::Warn => {
                        tracing::warn!(
                            cycle_entry = %edge.target,
                            max_iterations,
                            "iteration budget reached, stopping cyclic execution"
                        );
                        ctx.metadata.max_iterations_reached = true;
                        return Ok(Continuation::Stop);
                    }
                }
            }
        }

        queue.push_back(target);
    }

    Ok(Continuation::Continue)
}

/// The cyclic path: breadth-first over a ready queue, bounded by the
/// iteration budget and per-node visit caps.
async fn execute_cyclic(
    config: &FlowConfig,
    topology: &Topology,
    registry: &ComponentRegistry,
    hooks: &HookDispatcher,
    ctx: &mut Context,
) -> FlowResult<()> {
    let n = config.nodes.len();
    let completed_before = ctx.metadata.completed_nodes.clone();

    // Roots: in-degree zero over forward edges, in declaration order. A
    // graph where every node sits on a cycle starts at the first declared
    // node.
    let mut queue: VecDeque<usize> = (0..n)
        .filter(|&i| {
            topology.incoming[i]
                .iter()
                .all(|e| topology.back_edges.contains(e))
        })
        .collect();
    if queue.is_empty() {
        queue.push_back(0);
    }

    let mut skipped = vec![false; n];
    let mut refired_completed: HashSet<usize> = HashSet::new();

    while let Some(node_index) = queue.pop_front() {
        let node = &config.nodes[node_index];
        let id = node.id.as_str();

        if let Some(max_visits) = node.max_visits {
            if ctx.metadata.visit_count(id) >= max_visits {
                continue;
            }
        }

        if completed_before.contains(id) || ctx.metadata.completed_nodes.contains(id) {
            // Already terminated normally, either before suspension or
            // earlier in this pass; never re-run. The node's chosen port is
            // transient and was not serialized, so every outgoing edge is
            // treated as satisfied, as on the DAG resume path. Completed
            // nodes are never cycle members, so none of these edges is a
            // back-edge and the iteration budget is not involved.
            if refired_completed.insert(node_index) {
                for &edge_index in &topology.outgoing[node_index] {
                    let target = topology.index_of[config.edges[edge_index].target.as_str()];
                    queue.push_back(target);
                }
            }
            continue;
        }

        check_deadline_between_steps(ctx, id)?;
        ctx.clear_active_port();

        let component = registry.get(&node.component_name).ok_or_else(|| {
            FlowError::configuration(format!(
                "component '{}' is not registered",
                node.component_name
            ))
        })?;

        let result = run_step(
            StepInvocation {
                step_index: node_index,
                label: id,
                component_name: &node.component_name,
                component,
                timeout_mode: config.settings.timeout_mode,
            },
            ctx,
            hooks,
        )
        .await;

        match result {
            Ok(()) => {
                if ctx.is_suspended() {
                    // The suspended visit does not count; the node re-executes
                    // on resume.
                    return Ok(());
                }
                ctx.metadata.record_visit(id);
                if !topology.cycle_members.contains(&node_index) {
                    ctx.metadata.completed_nodes.insert(id.to_string());
                }
                let active_port = ctx.active_port().map(str::to_string);
                match fire_outgoing(
                    config,
                    topology,
                    node_index,
                    active_port.as_deref(),
                    &mut queue,
                    ctx,
                )? {
                    Continuation::Continue => {}
                    Continuation::Stop => return Ok(()),
                }
            }
            Err(error) => {
                if error.is_fatal() {
                    return Err(error);
                }
                ctx.metadata
                    .record_error(&node.component_name, &error.to_string(), error.category());
                match config.error_policy(node.on_error) {
                    ErrorPolicy::Fail => return Err(error),
                    ErrorPolicy::Skip => {
                        skipped[node_index] = true;
                        ctx.metadata.record_skip(id);
                        hooks.node_skipped(id, ctx, REASON_ERROR_POLICY).await;
                    }
                    ErrorPolicy::Continue => {
                        ctx.metadata.record_visit(id);
                        if !topology.cycle_members.contains(&node_index) {
                            ctx.metadata.completed_nodes.insert(id.to_string());
                        }
                        // Completed with no active port: only ungated edges fire.
                        match fire_outgoing(config, topology, node_index, None, &mut queue, ctx)? {
                            Continuation::Continue => {}
                            Continuation::Stop => return Ok(()),
                        }
                    }
                }
            }
        }
    }

    // The queue drained naturally: nodes that never ran were unreachable.
    for node_index in 0..n {
        let id = config.nodes[node_index].id.as_str();
        if ctx.metadata.visit_count(id) == 0
            && !skipped[node_index]
            && !completed_before.contains(id)
            && !ctx.metadata.completed_nodes.contains(id)
        {
            ctx.metadata.record_skip(id);
            hooks.node_skipped(id, ctx, REASON_UNREACHABLE).await;
        }
    }

    Ok(())
}

/// Component names a graph flow references, in declaration order. Cyclic
/// flows have no topological listing, so this is the dry-run answer for all
/// graphs.
pub(crate) fn referenced_components(config: &FlowConfig) -> Vec<String> {
    config
        .nodes
        .iter()
        .map(|node| node.component_name.clone())
        .collect()
}
