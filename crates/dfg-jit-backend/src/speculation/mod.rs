//! Speculation assignment pass (C3).
//!
//! Assigns every edge in every node a `UseKind`, and accumulates each
//! logical variable's speculation mask from the `SetLocal`s that target
//! it. Order-independent across nodes; the only real sequencing
//! constraint is that `SetLocal` is processed in a second micro-pass
//! after every local's mask has been finalized (§4.3).

use crate::graph::node::{BCKind, LocalId};
use crate::graph::{Graph, NodeId, NodeKind, TypeMask, UseKind};
use crate::typecheck::{TypeCheckSelection, TypeCheckSelector};

/// Guest-language BCKind dispatch table. The real implementation is
/// generated by the (out-of-scope) Deegen meta-compiler from bytecode
/// definitions; callers supply their own.
pub trait GuestSpeculationRules {
    /// Required check mask for guest node `bc_kind`'s input `input_idx`,
    /// or `None` to leave it untyped (no runtime check).
    fn required_check_mask(&self, bc_kind: BCKind, input_idx: usize) -> Option<TypeMask>;

    /// Chooses a DFG variant ordinal once every input's use-kind is known.
    fn select_variant(&self, bc_kind: BCKind, use_kinds: &[UseKind]) -> u32;
}

/// Leaves every guest-language input untyped and always selects variant 0.
/// Useful for tests and as a conservative fallback.
pub struct UntypedGuestSpeculationRules;

impl GuestSpeculationRules for UntypedGuestSpeculationRules {
    fn required_check_mask(&self, _bc_kind: BCKind, _input_idx: usize) -> Option<TypeMask> {
        None
    }
    fn select_variant(&self, _bc_kind: BCKind, _use_kinds: &[UseKind]) -> u32 {
        0
    }
}

/// If a target mask is exactly one primitive type kind, returns its
/// proven-use-kind ordinal; compound masks fall back to `Untyped` rather
/// than to a dedicated proven ordinal (see DESIGN.md).
fn mask_to_proven_ord(m: TypeMask) -> Option<u16> {
    if m.0 != 0 && m.0.count_ones() == 1 {
        Some(m.0.trailing_zeros() as u16)
    } else {
        None
    }
}

/// Picks the use-kind for one typed edge given what must be checked
/// (`check_mask`) and what's already known (`precondition`).
fn assign_use_kind(selector: &TypeCheckSelector, check_mask: TypeMask, precondition: TypeMask) -> UseKind {
    if precondition.is_empty() {
        return UseKind::UNREACHABLE;
    }
    match selector.select(check_mask, precondition) {
        TypeCheckSelection::TriviallyFalse => UseKind::ALWAYS_OSR_EXIT,
        TypeCheckSelection::TriviallyTrue => {
            let target = check_mask.cap(precondition);
            if target == TypeMask::TOP {
                UseKind::UNTYPED
            } else {
                match mask_to_proven_ord(target) {
                    Some(ord) => UseKind::proven(ord),
                    None => UseKind::UNTYPED,
                }
            }
        }
        TypeCheckSelection::CallFunction { rule_idx } => UseKind::unproven(rule_idx, false),
        TypeCheckSelection::CallFunctionAndFlip { rule_idx } => UseKind::unproven(rule_idx, true),
    }
}

/// A `SetLocal` deferred until every reaching assignment's contribution to
/// the target local's speculation mask has been folded in.
struct PendingSetLocal {
    node: NodeId,
    local: LocalId,
    input_prediction: TypeMask,
    input_is_unboxed: bool,
}

/// Runs the full speculation assignment pass over `graph`.
pub fn run_speculation_assignment_pass(
    graph: &mut Graph,
    selector: &TypeCheckSelector,
    guest_rules: &dyn GuestSpeculationRules,
) {
    let mut pending_set_locals = Vec::new();

    let block_ids: Vec<_> = (0..graph.blocks.len() as u32).map(crate::graph::BlockId).collect();
    for block_id in block_ids {
        let node_ids = graph.block(block_id).nodes.clone();
        for node_id in node_ids {
            process_node(graph, node_id, selector, guest_rules, &mut pending_set_locals);
        }
    }

    // Second micro-pass: now that every local's mask has its full union,
    // assign use-kinds to the deferred SetLocal input edges.
    for pending in &pending_set_locals {
        let use_kind = if pending.input_is_unboxed {
            UseKind::KNOWN_UNBOXED_INT64
        } else {
            let local_mask = graph.local(pending.local).speculation_mask;
            assign_use_kind(selector, local_mask, pending.input_prediction)
        };
        graph.node_mut(pending.node).inputs[0].use_kind = use_kind;
    }
}

fn process_node(
    graph: &mut Graph,
    node_id: NodeId,
    selector: &TypeCheckSelector,
    guest_rules: &dyn GuestSpeculationRules,
    pending_set_locals: &mut Vec<PendingSetLocal>,
) {
    let kind = graph.node(node_id).kind.clone();
    match kind {
        NodeKind::Guest { bc_kind, .. } => {
            process_guest_node(graph, node_id, bc_kind, selector, guest_rules);
        }
        NodeKind::SetLocal { local } => {
            process_set_local_phase_one(graph, node_id, local, pending_set_locals);
        }
        NodeKind::SetUpvalue { .. } => {
            force_first_input(graph, node_id, UseKind::KNOWN_UNBOXED_INT64);
            assign_default_untyped_rest(graph, node_id, selector, 1);
        }
        NodeKind::CreateVariadicRes { .. } => {
            force_first_input(graph, node_id, UseKind::KNOWN_UNBOXED_INT64);
            assign_default_untyped_rest(graph, node_id, selector, 1);
            assign_range_untyped(graph, node_id, selector);
        }
        NodeKind::PrependVariadicRes => {
            force_first_input(graph, node_id, UseKind::KNOWN_UNBOXED_INT64);
            assign_default_untyped_rest(graph, node_id, selector, 1);
        }
        NodeKind::GetCapturedVar | NodeKind::CreateCapturedVar => {
            force_first_input(graph, node_id, UseKind::KNOWN_CAPTURED_VAR);
            assign_default_untyped_rest(graph, node_id, selector, 1);
        }
        NodeKind::GetUpvalueImmutable { .. } | NodeKind::GetUpvalueMutable { .. } => {
            force_first_input(graph, node_id, UseKind::KNOWN_UNBOXED_INT64);
            assign_default_untyped_rest(graph, node_id, selector, 1);
        }
        NodeKind::CheckU64InBound { .. } | NodeKind::I64SubSaturateToZero => {
            force_first_input(graph, node_id, UseKind::KNOWN_UNBOXED_INT64);
            assign_default_untyped_rest(graph, node_id, selector, 1);
        }
        NodeKind::CreateFunctionObject { .. } => {
            force_first_input(graph, node_id, UseKind::KNOWN_UNBOXED_INT64);
            assign_default_untyped_rest(graph, node_id, selector, 1);
        }
        NodeKind::Phantom | NodeKind::ShadowStore { .. } | NodeKind::ShadowStoreUndefToRange { .. } => {
            // Ghost-like nodes have no runtime check; their sole input
            // is always Untyped, never routed through the selector.
            force_first_input(graph, node_id, UseKind::UNTYPED);
        }
        _ => {
            assign_default_untyped_rest(graph, node_id, selector, 0);
        }
    }
}

fn force_first_input(graph: &mut Graph, node_id: NodeId, use_kind: UseKind) {
    let node = graph.node_mut(node_id);
    if let Some(edge) = node.inputs.get_mut(0) {
        edge.use_kind = use_kind;
    }
}

/// Every fixed input from `skip_from` onward gets the default speculation
/// treatment: check nothing beyond what's already proven (check_mask=TOP).
fn assign_default_untyped_rest(graph: &mut Graph, node_id: NodeId, selector: &TypeCheckSelector, skip_from: usize) {
    let node = graph.node_mut(node_id);
    for edge in node.inputs.iter_mut().skip(skip_from) {
        edge.use_kind = assign_use_kind(selector, TypeMask::TOP, edge.prediction_mask);
    }
}

fn assign_range_untyped(graph: &mut Graph, node_id: NodeId, selector: &TypeCheckSelector) {
    let node = graph.node_mut(node_id);
    for edge in node.range_inputs.iter_mut() {
        edge.use_kind = assign_use_kind(selector, TypeMask::TOP, edge.prediction_mask);
    }
}

fn process_guest_node(
    graph: &mut Graph,
    node_id: NodeId,
    bc_kind: BCKind,
    selector: &TypeCheckSelector,
    guest_rules: &dyn GuestSpeculationRules,
) {
    let num_inputs = graph.node(node_id).inputs.len();
    let mut use_kinds = Vec::with_capacity(num_inputs);
    for i in 0..num_inputs {
        let prediction = graph.node(node_id).inputs[i].prediction_mask;
        let check_mask = guest_rules.required_check_mask(bc_kind, i).unwrap_or(TypeMask::TOP);
        use_kinds.push(assign_use_kind(selector, check_mask, prediction));
    }
    for (i, uk) in use_kinds.iter().enumerate() {
        graph.node_mut(node_id).inputs[i].use_kind = *uk;
    }
    let variant = guest_rules.select_variant(bc_kind, &use_kinds);
    if let NodeKind::Guest { variant_ord, .. } = &mut graph.node_mut(node_id).kind {
        *variant_ord = Some(variant);
    }
}

/// `SetLocal`'s speculation contribution to its target local. The input
/// edge's own use-kind is *not* assigned here; it waits for the second
/// micro-pass once the local's mask has seen every contribution.
fn process_set_local_phase_one(
    graph: &mut Graph,
    node_id: NodeId,
    local: LocalId,
    pending: &mut Vec<PendingSetLocal>,
) {
    let input_prediction = graph.node(node_id).inputs[0].prediction_mask;

    // TODO: the source notes GetLocal's speculation could possibly be
    // widened past the plain union of reaching SetLocal predictions; the
    // heuristic for doing so was never documented upstream, so this keeps
    // the conservative union-only behavior.
    let is_unboxed = input_prediction == TypeMask::OPAQUE;

    let contribution = if is_unboxed {
        TypeMask::OPAQUE
    } else {
        let mut m = minimal_covering_mask(input_prediction);
        if input_prediction.cap(TypeMask::NIL) != TypeMask::BOTTOM || input_prediction.is_empty() {
            m = m | TypeMask::NIL;
        }
        m
    };

    let local_info = graph.local_mut(local);
    local_info.speculation_mask = local_info.speculation_mask | contribution;

    pending.push(PendingSetLocal {
        node: node_id,
        local,
        input_prediction,
        input_is_unboxed: is_unboxed,
    });
}

/// The smallest type mask among the "interesting" lattice points that
/// covers `prediction` (a simplified stand-in for the source's
/// `GetMinimalSpeculationCoveringPredictionMask`, which consults the full
/// Deegen-generated mask list; here every mask is already a valid lattice
/// point so the prediction itself is already minimal).
fn minimal_covering_mask(prediction: TypeMask) -> TypeMask {
    prediction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};

    fn selector() -> TypeCheckSelector {
        TypeCheckSelector::new(vec![])
    }

    #[test]
    fn s4_get_local_set_local_round_trip() {
        let mut g = crate::graph::Graph::new(0, false);
        let local = g.alloc_local(0);
        let entry = g.entry_block();

        let get_local = g.add_node(entry, Node::new(NodeKind::GetLocal { local }));
        let set_local = g
            .add_node(entry, Node::new(NodeKind::SetLocal { local }).with_inputs([Edge::new(get_local, 0, TypeMask::BOOL)]));
        let _ret = g.add_node(entry, Node::new(NodeKind::Return));
        let _ = set_local;

        let sel = selector();
        run_speculation_assignment_pass(&mut g, &sel, &UntypedGuestSpeculationRules);

        assert_eq!(g.local(local).speculation_mask, TypeMask::BOOL);
    }

    #[test]
    fn unreachable_precondition_yields_unreachable_use_kind() {
        let mut g = crate::graph::Graph::new(0, false);
        let entry = g.entry_block();
        let src = g.add_node(entry, Node::new(NodeKind::Constant { value: 1 }));
        let consumer = g.add_node(
            entry,
            Node::new(NodeKind::Guest { bc_kind: BCKind(0), variant_ord: None })
                .with_inputs([Edge::new(src, 0, TypeMask::BOTTOM)]),
        );

        let sel = selector();
        run_speculation_assignment_pass(&mut g, &sel, &UntypedGuestSpeculationRules);

        assert_eq!(g.node(consumer).inputs[0].use_kind, UseKind::UNREACHABLE);
    }

    #[test]
    fn builtin_setupvalue_forces_known_unboxed_int64() {
        let mut g = crate::graph::Graph::new(0, false);
        let entry = g.entry_block();
        let idx = g.add_node(entry, Node::new(NodeKind::UnboxedConstant { value: 0 }));
        let value = g.add_node(entry, Node::new(NodeKind::Constant { value: 7 }));
        let setup = g.add_node(
            entry,
            Node::new(NodeKind::SetUpvalue { index: 0 })
                .with_inputs([Edge::new(idx, 0, TypeMask::OPAQUE), Edge::new(value, 0, TypeMask::TOP)]),
        );

        let sel = selector();
        run_speculation_assignment_pass(&mut g, &sel, &UntypedGuestSpeculationRules);

        assert_eq!(g.node(setup).inputs[0].use_kind, UseKind::KNOWN_UNBOXED_INT64);
    }
}
