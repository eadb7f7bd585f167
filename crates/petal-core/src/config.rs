/// Configuration for the petal renderer.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub batch: BatchConfig,
    pub textures: TextureConfig,
}

/// Settings for `SpriteBatch` and its item pool.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of batch items preallocated by the pool. The pool doubles when
    /// exhausted and never shrinks.
    pub initial_capacity: usize,
    /// Emit a trace event for every flush made in `Immediate` sort mode.
    pub trace_immediate_flushes: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            trace_immediate_flushes: false,
        }
    }
}

/// Settings for texture surfaces.
#[derive(Debug, Clone)]
pub struct TextureConfig {
    /// Round blank textures up to power-of-two dimensions, for hardware that
    /// cannot sample non-power-of-two textures.
    pub power_of_two: bool,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self { power_of_two: true }
    }
}

impl TextureConfig {
    /// Allocation size for a requested dimension.
    pub fn allocation_size(&self, requested: u32) -> u32 {
        if !self.power_of_two {
            return requested;
        }
        let mut size = 1u32;
        while size < requested {
            match size.checked_mul(2) {
                Some(next) => size = next,
                None => return requested,
            }
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two_rounding() {
        let config = TextureConfig::default();
        assert_eq!(config.allocation_size(0), 1);
        assert_eq!(config.allocation_size(1), 1);
        assert_eq!(config.allocation_size(3), 4);
        assert_eq!(config.allocation_size(64), 64);
        assert_eq!(config.allocation_size(65), 128);
    }

    #[test]
    fn test_rounding_disabled() {
        let config = TextureConfig { power_of_two: false };
        assert_eq!(config.allocation_size(65), 65);
    }

    #[test]
    fn test_dimensions_round_independently() {
        // A tall texture must not stop growing once the short side is satisfied.
        let config = TextureConfig::default();
        assert_eq!((config.allocation_size(2), config.allocation_size(300)), (2, 512));
    }

    #[test]
    fn test_rounding_past_largest_power_keeps_request() {
        let config = TextureConfig::default();
        assert_eq!(config.allocation_size(u32::MAX), u32::MAX);
    }
}
