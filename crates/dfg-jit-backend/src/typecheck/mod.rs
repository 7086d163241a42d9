//! Type-check function selector (C2).
//!
//! Wraps a compile-time strength-reduction rule table (and the C1
//! automata built over it) to answer: "given what we must check and what
//! we already know is true, what's the cheapest way to check it?"

use crate::automata::TypeMaskOverapproxAutomata;
use crate::graph::types::TypeMask;

/// One entry of the strength-reduction rule table: a pre-generated
/// type-check implementation function, the mask it checks, the
/// precondition it requires, and its estimated runtime cost.
#[derive(Debug, Clone, Copy)]
pub struct TypeCheckRule {
    pub check_mask: TypeMask,
    pub precond_mask: TypeMask,
    pub estimated_cost: u32,
}

/// Result of selecting an implementation for `(checkMask, preconditionMask)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheckSelection {
    TriviallyFalse,
    TriviallyTrue,
    CallFunction { rule_idx: u16 },
    CallFunctionAndFlip { rule_idx: u16 },
}

impl TypeCheckSelection {
    /// Cost layout from the source: trivial = 1, rule = 2*cost+2,
    /// flipped-rule = 2*cost+3, so an equal-cost rule always beats its flip.
    fn cost(self, rules: &[TypeCheckRule]) -> u32 {
        match self {
            TypeCheckSelection::TriviallyFalse | TypeCheckSelection::TriviallyTrue => 1,
            TypeCheckSelection::CallFunction { rule_idx } => 2 * rules[rule_idx as usize].estimated_cost + 2,
            TypeCheckSelection::CallFunctionAndFlip { rule_idx } => {
                2 * rules[rule_idx as usize].estimated_cost + 3
            }
        }
    }
}

/// The compile-time-constant strength-reduction table plus its selection
/// automata (one automaton per target check mask, per §4.2).
pub struct TypeCheckSelector {
    rules: Vec<TypeCheckRule>,
}

impl TypeCheckSelector {
    pub fn new(rules: Vec<TypeCheckRule>) -> TypeCheckSelector {
        TypeCheckSelector { rules }
    }

    pub fn rules(&self) -> &[TypeCheckRule] {
        &self.rules
    }

    /// Selects the cheapest way to check `check_mask` given that the value
    /// is already known to satisfy `precondition_mask`.
    pub fn select(&self, check_mask: TypeMask, precondition_mask: TypeMask) -> TypeCheckSelection {
        let target = check_mask.cap(precondition_mask);

        if target.is_empty() {
            return TypeCheckSelection::TriviallyFalse;
        }
        if target == precondition_mask {
            return TypeCheckSelection::TriviallyTrue;
        }

        let best_rule = self.find_best_rule(precondition_mask, target, false);
        let best_flipped = self.find_best_rule(precondition_mask, target, true);

        match (best_rule, best_flipped) {
            (None, None) => {
                // The rule table is expected to always cover a well-formed
                // request; a gap here is a configuration bug, not a
                // caller-facing error.
                panic!(
                    "no strength-reduction rule covers check={check_mask:?} precond={precondition_mask:?}"
                );
            }
            (Some(r), None) => TypeCheckSelection::CallFunction { rule_idx: r },
            (None, Some(r)) => TypeCheckSelection::CallFunctionAndFlip { rule_idx: r },
            (Some(r1), Some(r2)) => {
                let a = TypeCheckSelection::CallFunction { rule_idx: r1 };
                let b = TypeCheckSelection::CallFunctionAndFlip { rule_idx: r2 };
                if a.cost(&self.rules) <= b.cost(&self.rules) {
                    a
                } else {
                    b
                }
            }
        }
    }

    /// Finds the cheapest rule index satisfying, for `flip=false`:
    /// `rule.precondition ⊇ precondition ∧ rule.check ∩ precondition == target ∩ precondition`,
    /// or for `flip=true`, the same equation against the rule's *flipped* check mask.
    fn find_best_rule(&self, precondition: TypeMask, target: TypeMask, flip: bool) -> Option<u16> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| {
                if !rule.precond_mask.is_superset_of(precondition) {
                    return false;
                }
                let candidate_check = if flip {
                    rule.precond_mask.subtract(rule.check_mask)
                } else {
                    rule.check_mask
                };
                candidate_check.cap(precondition) == target.cap(precondition)
            })
            .min_by_key(|(_, rule)| rule.estimated_cost)
            .map(|(idx, _)| idx as u16)
    }

    /// Builds the C1 automaton that accelerates selection for a fixed
    /// target check mask across varying preconditions, mirroring
    /// `x_dfg_typecheck_select_impl_automata_list`.
    pub fn build_selection_automata(&self, check_mask: TypeMask) -> crate::error::Result<TypeMaskOverapproxAutomata> {
        let items: Vec<(TypeMask, u16)> = (0..=TypeMask::TOP.0)
            .filter(|x| TypeMask(*x).is_subset_of(TypeMask::TOP))
            .map(|x| {
                let selection = self.select(check_mask, TypeMask(x));
                (TypeMask(x), encode_selection(selection))
            })
            .collect();
        TypeMaskOverapproxAutomata::build(&items)
    }
}

fn encode_selection(sel: TypeCheckSelection) -> u16 {
    match sel {
        TypeCheckSelection::TriviallyFalse => 0,
        TypeCheckSelection::TriviallyTrue => 1,
        TypeCheckSelection::CallFunction { rule_idx } => 2 + 2 * rule_idx,
        TypeCheckSelection::CallFunctionAndFlip { rule_idx } => 3 + 2 * rule_idx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivially_true_and_false() {
        let sel = TypeCheckSelector::new(vec![]);
        assert_eq!(
            sel.select(TypeMask::BOOL, TypeMask::STRING),
            TypeCheckSelection::TriviallyFalse
        );
        assert_eq!(
            sel.select(TypeMask::BOOL, TypeMask::BOOL),
            TypeCheckSelection::TriviallyTrue
        );
    }

    #[test]
    fn s5_boolean_typed_input_picks_cheapest_rule() {
        let rules = vec![
            TypeCheckRule { check_mask: TypeMask::BOOL, precond_mask: TypeMask::TOP, estimated_cost: 3 },
            TypeCheckRule { check_mask: TypeMask::BOOL, precond_mask: TypeMask::TOP, estimated_cost: 7 },
        ];
        let sel = TypeCheckSelector::new(rules);
        let result = sel.select(TypeMask::BOOL, TypeMask::TOP);
        assert_eq!(result, TypeCheckSelection::CallFunction { rule_idx: 0 });
    }

    #[test]
    fn ties_break_toward_no_flip() {
        let rules = vec![
            TypeCheckRule { check_mask: TypeMask::BOOL, precond_mask: TypeMask::TOP, estimated_cost: 5 },
            TypeCheckRule {
                check_mask: TypeMask::TOP.subtract(TypeMask::BOOL),
                precond_mask: TypeMask::TOP,
                estimated_cost: 5,
            },
        ];
        let sel = TypeCheckSelector::new(rules);
        let result = sel.select(TypeMask::BOOL, TypeMask::TOP);
        assert_eq!(result, TypeCheckSelection::CallFunction { rule_idx: 0 });
    }
}
