use std::collections::VecDeque;

use anyhow::{bail, Result};

use crate::engine::CancellationToken;
use crate::graph::{NodeId, NullType, TypeSystem};

/// Assign every node its final label from the residual graph.
///
/// Order matters: non-null reachability runs first with saturated edges
/// hidden, then nullable reachability over every flow-capable edge, then the
/// nullable bias for undecided input positions, and a final non-null sweep.
/// This ordering minimises downstream warnings while keeping parameters
/// permissive.
pub fn assign_labels(ts: &mut TypeSystem, cancellation: &CancellationToken) -> Result<()> {
    let nullable_sink = ts.nullable_sink();
    let non_null_sink = ts.non_null_sink();
    ts.node_mut(nullable_sink).null_type = NullType::Infer;
    ts.node_mut(non_null_sink).null_type = NullType::Infer;

    propagate_non_null(ts, non_null_sink)?;
    cancellation.check()?;
    propagate_nullable(ts, nullable_sink)?;

    // Undecided caller-controlled positions default to nullable, and the
    // choice floods forward exactly like sink-driven nullability.
    for node in ts.nodes_in_input_positions().to_vec() {
        if ts.node(ts.representative(node)).null_type == NullType::Infer {
            propagate_nullable(ts, node)?;
        }
    }

    // Whatever neither phase claimed can safely be non-null. Representatives
    // first, then followers copy their class label.
    let ids = ts.all_nodes().map(|(id, _)| id).collect::<Vec<_>>();
    for &id in &ids {
        if ts.representative(id) == id && ts.node(id).null_type == NullType::Infer {
            ts.node_mut(id).null_type = NullType::NonNull;
        }
    }
    for &id in &ids {
        if ts.node(id).null_type == NullType::Infer {
            let label = ts.node(ts.representative(id)).null_type;
            ts.node_mut(id).null_type = label;
        }
    }

    verify_labels(ts)
}

/// Reverse reachability from the non-null sink, pruned at the min-cut: a node
/// that can reach the sink without crossing a saturated edge must be
/// non-null for a warning-free annotation.
fn propagate_non_null(ts: &mut TypeSystem, start: NodeId) -> Result<()> {
    let mut queue = VecDeque::new();
    ts.node_mut(start).null_type = NullType::NonNull;
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        let incoming = ts.node(node).incoming_edges().to_vec();
        for edge_id in incoming {
            let edge = ts.edge(edge_id);
            if edge.residual() == 0 {
                continue;
            }
            let prev = edge.source;
            match ts.node(prev).null_type {
                NullType::Infer => {
                    ts.node_mut(prev).null_type = NullType::NonNull;
                    queue.push_back(prev);
                }
                NullType::NonNull => {}
                NullType::Oblivious => {
                    bail!("internal error: oblivious node {prev:?} reached by inference")
                }
                NullType::Nullable => {
                    bail!("internal error: nullable node {prev:?} reaches the non-null sink uncut")
                }
            }
        }
    }
    Ok(())
}

/// Forward reachability over every edge that could ever carry flow,
/// saturated or not. Edges born with zero capacity are protections, not flow
/// paths, and stay hidden. Stops at nodes another phase already labelled.
fn propagate_nullable(ts: &mut TypeSystem, start: NodeId) -> Result<()> {
    let mut queue = VecDeque::new();
    if ts.node(start).null_type == NullType::Infer {
        ts.node_mut(start).null_type = NullType::Nullable;
        queue.push_back(start);
    }
    while let Some(node) = queue.pop_front() {
        let outgoing = ts.node(node).outgoing_edges().to_vec();
        for edge_id in outgoing {
            let edge = ts.edge(edge_id);
            if edge.capacity == 0 {
                continue;
            }
            let next = edge.target;
            match ts.node(next).null_type {
                NullType::Infer => {
                    ts.node_mut(next).null_type = NullType::Nullable;
                    queue.push_back(next);
                }
                NullType::Oblivious => {
                    bail!("internal error: oblivious node {next:?} reached by inference")
                }
                NullType::Nullable | NullType::NonNull => {}
            }
        }
    }
    Ok(())
}

/// Post-conditions of labeling: nothing left undecided, and every union-find
/// follower agrees with its representative.
fn verify_labels(ts: &TypeSystem) -> Result<()> {
    for (id, node) in ts.all_nodes() {
        if node.null_type == NullType::Infer {
            bail!("internal error: node {id:?} ({}) left undecided", node.name);
        }
        let representative = ts.representative(id);
        if node.null_type != ts.node(representative).null_type {
            bail!(
                "internal error: node {id:?} ({}) disagrees with its representative",
                node.name
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Builder, NullabilityEdge, PendingEdges, INFINITE_CAPACITY};
    use crate::maxflow::compute_max_flow;

    fn system_with(nodes: usize) -> (TypeSystem, Vec<NodeId>) {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let ids = (0..nodes)
            .map(|i| builder.new_node(None, format!("n{i}")))
            .collect();
        ts.merge_nodes(builder);
        (ts, ids)
    }

    fn solve(ts: &mut TypeSystem) {
        let cancellation = CancellationToken::default();
        compute_max_flow(ts, &cancellation).expect("max flow");
        assign_labels(ts, &cancellation).expect("labels");
    }

    #[test]
    fn unconstrained_nodes_default_to_non_null() {
        let (mut ts, ids) = system_with(2);
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(ids[0], ids[1], 1, "assignment"));
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(ids[0]).null_type, NullType::NonNull);
        assert_eq!(ts.node(ids[1]).null_type, NullType::NonNull);
    }

    #[test]
    fn null_fed_chain_becomes_nullable() {
        let (mut ts, ids) = system_with(2);
        let source = ts.nullable_sink();
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(source, ids[0], 1, "null literal"));
        pending.push(NullabilityEdge::new(ids[0], ids[1], 1, "assignment"));
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(ids[0]).null_type, NullType::Nullable);
        assert_eq!(ts.node(ids[1]).null_type, NullType::Nullable);
    }

    #[test]
    fn dereferenced_node_prefers_non_null() {
        let (mut ts, ids) = system_with(1);
        let sink = ts.non_null_sink();
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(ids[0], sink, 1, "dereference"));
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(ids[0]).null_type, NullType::NonNull);
    }

    #[test]
    fn saturated_dereference_stays_nullable_and_is_reported_by_flow() {
        // Null flows into a dereferenced position: the min-cut saturates the
        // dereference edge, so the nullable phase wins.
        let (mut ts, ids) = system_with(1);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(source, ids[0], 1, "null literal"));
        pending.push(NullabilityEdge::new(ids[0], sink, 1, "dereference").error());
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(ids[0]).null_type, NullType::Nullable);
        let deref = ts.all_edges().find(|e| e.is_error).expect("error edge");
        assert_eq!(deref.flow, 1);
    }

    #[test]
    fn undecided_input_positions_are_biased_nullable() {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let param = builder.new_node(None, "param");
        let ret = builder.new_node(None, "return");
        builder.mark_input_position(param);
        ts.merge_nodes(builder);
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(param, ret, 1, "return value"));
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(param).null_type, NullType::Nullable);
        assert_eq!(ts.node(ret).null_type, NullType::Nullable);
    }

    #[test]
    fn input_bias_does_not_cross_protection_edges() {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let param = builder.new_node(None, "param");
        let result = builder.new_node(None, "result");
        builder.mark_input_position(param);
        ts.merge_nodes(builder);
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(param, result, 0, "coalescing left"));
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(param).null_type, NullType::Nullable);
        assert_eq!(ts.node(result).null_type, NullType::NonNull);
    }

    #[test]
    fn unified_nodes_share_their_label() {
        let (mut ts, ids) = system_with(3);
        let source = ts.nullable_sink();
        let mut pending = PendingEdges::default();
        pending.unify(ids[0], ids[1], "override");
        pending.push(NullabilityEdge::new(source, ids[0], 1, "null literal"));
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(ids[0]).null_type, NullType::Nullable);
        assert_eq!(ts.node(ids[1]).null_type, NullType::Nullable);
        assert_eq!(ts.node(ids[2]).null_type, NullType::NonNull);
    }

    #[test]
    fn every_nullable_to_non_null_edge_is_saturated() {
        let (mut ts, ids) = system_with(4);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(source, ids[0], 1, "null literal"));
        pending.push(NullabilityEdge::new(ids[0], ids[1], 1, "assignment"));
        pending.push(NullabilityEdge::new(ids[1], ids[2], 1, "assignment"));
        pending.push(NullabilityEdge::new(ids[2], sink, 1, "dereference"));
        pending.push(NullabilityEdge::new(ids[3], sink, 1, "dereference"));
        ts.merge_edges(pending);

        solve(&mut ts);

        for edge in ts.all_edges() {
            let source_label = ts.node(edge.source).null_type;
            let target_label = ts.node(edge.target).null_type;
            if source_label == NullType::Nullable && target_label == NullType::NonNull {
                assert!(edge.is_saturated(), "uncut edge across the label boundary");
            }
        }
    }

    #[test]
    fn infinite_pre_label_edges_survive_the_cut() {
        let (mut ts, ids) = system_with(1);
        let source = ts.nullable_sink();
        let sink = ts.non_null_sink();
        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(
            source,
            ids[0],
            INFINITE_CAPACITY,
            "explicit nullable annotation",
        ));
        pending.push(NullabilityEdge::new(ids[0], sink, 1, "dereference").error());
        ts.merge_edges(pending);

        solve(&mut ts);

        assert_eq!(ts.node(ids[0]).null_type, NullType::Nullable);
        let deref = ts.all_edges().find(|e| e.is_error).expect("error edge");
        assert_eq!(deref.flow, 1, "asserted non-null context sees flow");
    }
}
