/// Backbone feature levels consumed by the pose head.
///
/// Each variant is one output of the backbone, listed from the high-resolution level to
/// the deepest one. The head resizes every level to the resolution of the first before
/// fusing them.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneLevel {
    /// Output of the third stage, 1/8 of the input resolution.
    Stride8,
    /// Output of the fourth stage, 1/16 of the input resolution.
    Stride16,
    /// Output of the fifth stage, 1/32 of the input resolution.
    Stride32,
}

impl BackboneLevel {
    /// All levels, in the order the backbone emits them.
    pub fn as_list() -> Vec<BackboneLevel> {
        vec![
            BackboneLevel::Stride8,
            BackboneLevel::Stride16,
            BackboneLevel::Stride32,
        ]
    }

    pub fn count() -> usize {
        Self::as_list().len()
    }

    /// One-based position of the level in the pyramid.
    pub fn get_id(&self) -> usize {
        *self as usize + 1
    }

    /// Backbone stage producing this level.
    pub fn stage(&self) -> usize {
        self.get_id() + 1
    }

    /// Downsampling factor relative to the network input.
    pub fn stride(&self) -> usize {
        1 << (self.stage() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_list_order_and_contents() {
        let levels = BackboneLevel::as_list();
        assert_eq!(levels.len(), BackboneLevel::count());
        assert!(matches!(levels[0], BackboneLevel::Stride8));
        assert!(matches!(levels[1], BackboneLevel::Stride16));
        assert!(matches!(levels[2], BackboneLevel::Stride32));
    }

    #[test]
    fn test_get_id_is_one_based() {
        for (index, level) in BackboneLevel::as_list().iter().enumerate() {
            assert_eq!(level.get_id(), index + 1);
        }
    }

    #[test]
    fn test_stride_values() {
        assert_eq!(BackboneLevel::Stride8.stride(), 8);
        assert_eq!(BackboneLevel::Stride16.stride(), 16);
        assert_eq!(BackboneLevel::Stride32.stride(), 32);
        assert_eq!(BackboneLevel::Stride32.stage(), 4);
    }
}
