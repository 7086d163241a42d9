//! `UseKind`: the per-edge annotation produced by speculation assignment
//! (C3) and consumed by register allocation (C5) and code emission (C8).

use super::types::TypeMask;
use std::fmt;

/// A finite, closed annotation describing how an SSA edge's value is
/// typed/checked at the point of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseKind(pub u16);

impl UseKind {
    pub const UNTYPED: UseKind = UseKind(0);
    pub const KNOWN_CAPTURED_VAR: UseKind = UseKind(1);
    pub const KNOWN_UNBOXED_INT64: UseKind = UseKind(2);
    pub const UNREACHABLE: UseKind = UseKind(3);
    pub const ALWAYS_OSR_EXIT: UseKind = UseKind(4);

    /// First use-kind ordinal that encodes a proven (no-runtime-check)
    /// non-trivial type mask.
    pub const FIRST_PROVEN_USE_KIND: u16 = 5;

    /// Number of non-trivial type masks with a dedicated "proven" use-kind.
    /// Mirrors `x_list_of_type_speculation_masks.size() - 2` (the table
    /// excludes the trivial `tTop`/`tBottom` entries).
    pub const NUM_PROVEN_KINDS: u16 = TypeMask::NUM_KINDS as u16;

    /// First use-kind ordinal that requires a non-trivial runtime check
    /// (encodes a strength-reduction rule index, possibly flipped).
    pub const FIRST_UNPROVEN_USE_KIND: u16 = Self::FIRST_PROVEN_USE_KIND + Self::NUM_PROVEN_KINDS;

    pub fn proven(mask_ord: u16) -> UseKind {
        debug_assert!(mask_ord < Self::NUM_PROVEN_KINDS);
        UseKind(Self::FIRST_PROVEN_USE_KIND + mask_ord)
    }

    pub fn unproven(rule_idx: u16, flip: bool) -> UseKind {
        UseKind(Self::FIRST_UNPROVEN_USE_KIND + 2 * rule_idx + flip as u16)
    }

    pub fn requires_non_trivial_runtime_check(self) -> bool {
        self.0 >= Self::FIRST_UNPROVEN_USE_KIND
    }

    pub fn is_proven(self) -> bool {
        self.0 >= Self::FIRST_PROVEN_USE_KIND && self.0 < Self::FIRST_UNPROVEN_USE_KIND
    }

    /// If this is an unproven use-kind, the (rule index, flip) it decodes to.
    pub fn unproven_rule(self) -> Option<(u16, bool)> {
        if !self.requires_non_trivial_runtime_check() {
            return None;
        }
        let ord = self.0 - Self::FIRST_UNPROVEN_USE_KIND;
        Some((ord / 2, ord % 2 == 1))
    }
}

impl fmt::Display for UseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            UseKind::UNTYPED => write!(f, "UntypedUse"),
            UseKind::KNOWN_CAPTURED_VAR => write!(f, "KnownCapturedVarUse"),
            UseKind::KNOWN_UNBOXED_INT64 => write!(f, "KnownUnboxedInt64Use"),
            UseKind::UNREACHABLE => write!(f, "UnreachableUse"),
            UseKind::ALWAYS_OSR_EXIT => write!(f, "AlwaysOsrExitUse"),
            uk if uk.is_proven() => write!(f, "ProvenUse({})", uk.0 - Self::FIRST_PROVEN_USE_KIND),
            uk => {
                let (rule, flip) = uk.unproven_rule().unwrap();
                write!(f, "UnprovenUse(rule={rule}, flip={flip})")
            }
        }
    }
}

/// One SSA use: the (node, output-ordinal) pair the edge reads from, the
/// upstream-propagated prediction mask, the use-kind assigned by C3, and
/// the "prediction proven double-not-NaN" flag used by a handful of
/// floating point fast paths.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub source_node: super::node::NodeId,
    pub output_ordinal: u8,
    /// Upstream type prediction for this edge's value; produced by the
    /// (out-of-scope) prediction-propagation pass that builds the graph.
    pub prediction_mask: TypeMask,
    pub use_kind: UseKind,
    pub is_known_double_not_nan: bool,
}

impl Edge {
    pub fn new(source_node: super::node::NodeId, output_ordinal: u8, prediction_mask: TypeMask) -> Edge {
        Edge {
            source_node,
            output_ordinal,
            prediction_mask,
            use_kind: UseKind::UNTYPED,
            is_known_double_not_nan: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proven_and_unproven_roundtrip() {
        let p = UseKind::proven(3);
        assert!(p.is_proven());
        assert!(!p.requires_non_trivial_runtime_check());

        let u = UseKind::unproven(7, true);
        assert!(u.requires_non_trivial_runtime_check());
        assert_eq!(u.unproven_rule(), Some((7, true)));

        let u2 = UseKind::unproven(7, false);
        assert_eq!(u2.unproven_rule(), Some((7, false)));
        assert!(u2.0 < u.0);
    }

    #[test]
    fn builtin_names() {
        assert_eq!(UseKind::UNTYPED.to_string(), "UntypedUse");
        assert_eq!(UseKind::ALWAYS_OSR_EXIT.to_string(), "AlwaysOsrExitUse");
    }
}
