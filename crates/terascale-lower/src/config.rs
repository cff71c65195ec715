//! Shader compile configuration.

use terascale_ir::{ChipClass, OptimizationLevel, OptimizerConfig};

/// Per-shader lowering configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConfig {
    /// Target generation
    pub chip: ChipClass,
    /// Use the legacy (D3D9) multiply rules: `0 * x == 0` even for
    /// infinities and NaN
    pub legacy_math_rules: bool,
    /// Cleanup passes run by [`Shader::optimize`](crate::shader::Shader::optimize)
    pub optimizer: OptimizerConfig,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new(ChipClass::Evergreen)
    }
}

impl ShaderConfig {
    /// Default configuration for `chip`
    pub fn new(chip: ChipClass) -> Self {
        Self {
            chip,
            legacy_math_rules: false,
            optimizer: OptimizerConfig::default(),
        }
    }

    /// Builder: legacy math rules
    pub fn with_legacy_math_rules(mut self, legacy: bool) -> Self {
        self.legacy_math_rules = legacy;
        self
    }

    /// Builder: optimizer configuration
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Builder: optimizer preset
    pub fn with_optimization_level(self, level: OptimizationLevel) -> Self {
        self.with_optimizer(OptimizerConfig::with_level(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = ShaderConfig::new(ChipClass::Cayman)
            .with_legacy_math_rules(true)
            .with_optimization_level(OptimizationLevel::None);
        assert_eq!(config.chip, ChipClass::Cayman);
        assert!(config.legacy_math_rules);
        assert!(!config.optimizer.dead_code_elimination);
    }

    #[test]
    fn test_default_targets_evergreen() {
        let config = ShaderConfig::default();
        assert_eq!(config.chip, ChipClass::Evergreen);
        assert!(!config.legacy_math_rules);
        assert_eq!(config.optimizer.level, OptimizationLevel::Standard);
    }
}
