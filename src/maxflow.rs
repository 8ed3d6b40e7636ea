use std::collections::VecDeque;

use anyhow::Result;

use crate::engine::CancellationToken;
use crate::graph::{EdgeId, NodeId, TypeSystem};

/// Compute a maximum flow from the nullable sink to the non-null sink.
///
/// Shortest augmenting paths (Edmonds–Karp): integer capacities and small
/// graphs make this deterministic and fast enough. Flow is stored per edge;
/// saturated edges form the min-cut frontier the label propagator prunes.
pub fn compute_max_flow(ts: &mut TypeSystem, cancellation: &CancellationToken) -> Result<u32> {
    let source = ts.nullable_sink();
    let sink = ts.non_null_sink();
    let mut total = 0u32;
    loop {
        cancellation.check()?;
        let Some(path) = augmenting_path(ts, source, sink) else {
            break;
        };
        let bottleneck = path
            .iter()
            .map(|step| step.headroom(ts))
            .min()
            .expect("augmenting path is never empty");
        for step in &path {
            let edge = ts.edge_mut(step.edge);
            if step.forward {
                edge.flow += bottleneck;
            } else {
                edge.flow -= bottleneck;
            }
        }
        total = total.saturating_add(bottleneck);
    }
    Ok(total)
}

/// One hop of an augmenting path: either along an edge with residual
/// capacity, or against an edge that already carries flow.
#[derive(Clone, Copy)]
struct Step {
    edge: EdgeId,
    forward: bool,
}

impl Step {
    fn headroom(&self, ts: &TypeSystem) -> u32 {
        let edge = ts.edge(self.edge);
        if self.forward {
            edge.residual()
        } else {
            edge.flow
        }
    }
}

fn augmenting_path(ts: &TypeSystem, source: NodeId, sink: NodeId) -> Option<Vec<Step>> {
    let mut parent: Vec<Option<(NodeId, Step)>> = vec![None; ts.node_count()];
    let mut queue = VecDeque::new();
    queue.push_back(source);
    while let Some(node) = queue.pop_front() {
        if node == sink {
            break;
        }
        for &edge_id in ts.node(node).outgoing_edges() {
            let edge = ts.edge(edge_id);
            let next = edge.target;
            if edge.residual() > 0 && next != source && parent[next.0 as usize].is_none() {
                parent[next.0 as usize] = Some((
                    node,
                    Step {
                        edge: edge_id,
                        forward: true,
                    },
                ));
                queue.push_back(next);
            }
        }
        for &edge_id in ts.node(node).incoming_edges() {
            let edge = ts.edge(edge_id);
            let next = edge.source;
            if edge.flow > 0 && next != source && parent[next.0 as usize].is_none() {
                parent[next.0 as usize] = Some((
                    node,
                    Step {
                        edge: edge_id,
                        forward: false,
                    },
                ));
                queue.push_back(next);
            }
        }
    }

    parent[sink.0 as usize]?;
    let mut path = Vec::new();
    let mut node = sink;
    while node != source {
        let (prev, step) = parent[node.0 as usize].expect("reconstructed path");
        path.push(step);
        node = prev;
    }
    path.reverse();
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Builder, NullabilityEdge, PendingEdges, INFINITE_CAPACITY};

    fn system_with(nodes: usize) -> (TypeSystem, Vec<NodeId>) {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let ids = (0..nodes)
            .map(|i| builder.new_node(None, format!("n{i}")))
            .collect();
        ts.merge_nodes(builder);
        (ts, ids)
    }

    fn connect(ts: &mut TypeSystem, edges: &[(NodeId, NodeId, u32)]) {
        let mut pending = PendingEdges::default();
        for &(source, target, capacity) in edges {
            pending.push(NullabilityEdge::new(source, target, capacity, "test"));
        }
        ts.merge_edges(pending);
    }

    #[test]
    fn saturates_a_simple_chain() {
        let (mut ts, ids) = system_with(1);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        connect(&mut ts, &[(source, ids[0], 1), (ids[0], sink, 1)]);

        let flow = compute_max_flow(&mut ts, &CancellationToken::default()).expect("flow");

        assert_eq!(flow, 1);
        assert!(ts.all_edges().all(|e| e.is_saturated()));
    }

    #[test]
    fn flow_is_limited_by_the_bottleneck() {
        let (mut ts, ids) = system_with(2);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        connect(
            &mut ts,
            &[
                (source, ids[0], 1),
                (source, ids[1], 1),
                (ids[0], sink, 1),
                (ids[1], ids[0], 1),
            ],
        );

        let flow = compute_max_flow(&mut ts, &CancellationToken::default()).expect("flow");

        assert_eq!(flow, 1);
    }

    #[test]
    fn reroutes_through_residual_edges() {
        // Classic case where the first shortest path must be partially undone.
        let (mut ts, ids) = system_with(2);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        connect(
            &mut ts,
            &[
                (source, ids[0], 1),
                (source, ids[1], 1),
                (ids[0], ids[1], 1),
                (ids[0], sink, 1),
                (ids[1], sink, 1),
            ],
        );

        let flow = compute_max_flow(&mut ts, &CancellationToken::default()).expect("flow");

        assert_eq!(flow, 2);
    }

    #[test]
    fn infinite_edges_are_never_saturated() {
        let (mut ts, ids) = system_with(1);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        connect(
            &mut ts,
            &[(source, ids[0], INFINITE_CAPACITY), (ids[0], sink, 1)],
        );

        let flow = compute_max_flow(&mut ts, &CancellationToken::default()).expect("flow");

        assert_eq!(flow, 1);
        let infinite = ts
            .all_edges()
            .find(|e| e.capacity == INFINITE_CAPACITY)
            .expect("infinite edge");
        assert!(!infinite.is_saturated());
        assert_eq!(infinite.flow, 1);
    }

    #[test]
    fn zero_capacity_edges_carry_nothing() {
        let (mut ts, ids) = system_with(1);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        connect(&mut ts, &[(source, ids[0], 0), (ids[0], sink, 1)]);

        let flow = compute_max_flow(&mut ts, &CancellationToken::default()).expect("flow");

        assert_eq!(flow, 0);
    }

    #[test]
    fn cancelled_token_aborts_the_solver() {
        let (mut ts, ids) = system_with(1);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        connect(&mut ts, &[(source, ids[0], 1), (ids[0], sink, 1)]);

        let cancellation = CancellationToken::default();
        cancellation.cancel();
        let err = compute_max_flow(&mut ts, &cancellation).expect_err("cancelled");
        assert!(err.downcast_ref::<crate::engine::Cancelled>().is_some());
    }
}
