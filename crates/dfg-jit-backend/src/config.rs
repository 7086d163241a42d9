//! Compile-time policy knobs for the backend core.

/// Bundles the handful of policy decisions the core makes, so callers
/// don't thread individual flags through the compile entry point.
#[derive(Debug, Clone, Copy)]
pub struct CompileConfig {
    /// Minimum number of return slots the `Return` node handler nil-fills,
    /// mirroring `x_minNilFillReturnValues` in the source.
    pub min_nil_fill_return_values: u32,
    /// Enables per-move OSR/register-state cross-checks. Expensive; only
    /// meant for test builds.
    pub enable_shadow_state_cross_checks: bool,
    /// Number of usable GPRs in the allocator's GPR bank.
    pub num_gpr_registers: u8,
    /// Number of usable FPRs in the allocator's FPR bank.
    pub num_fpr_registers: u8,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            min_nil_fill_return_values: 3,
            enable_shadow_state_cross_checks: cfg!(debug_assertions),
            num_gpr_registers: 15, // all GPRs except rsp
            num_fpr_registers: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_debug_assertions() {
        let cfg = CompileConfig::default();
        assert_eq!(cfg.enable_shadow_state_cross_checks, cfg!(debug_assertions));
        assert_eq!(cfg.min_nil_fill_return_values, 3);
    }
}
