use burn::config::Config;

/// Side length the pose models are trained at.
pub const INPUT_SIZE: usize = 640;
/// Resolution ratio between the network input and the pose heatmaps.
pub const OUTPUT_STRIDE: usize = 4;
/// Grey used when letterboxing images to a square input.
pub const PAD_VALUE: u8 = 114;
/// Confidence used by prediction when neither the caller nor the processing params set one.
pub const DEFAULT_POSE_CONF: f32 = 0.5;

/// Numeric representation applied by post-training quantization.
///
/// Converted into a [`QuantDescriptors`](crate::quantization::QuantDescriptors) bundle
/// and handed to every quantized replacement at construction time.
#[derive(Config, Debug)]
pub struct QuantizationConfig {
    #[config(default = 8)]
    pub num_bits: usize,
    /// Use the symmetric range `[-(2^(n-1) - 1), 2^(n-1) - 1]`.
    #[config(default = true)]
    pub narrow_range: bool,
    #[config(default = true)]
    pub per_channel_weights: bool,
    /// Calibrated absolute maximum for layer inputs. Dynamic per call when unset.
    pub input_amax: Option<f64>,
}

/// Decoding of DEKR-style pose heads: a center heatmap plus per-joint offsets.
#[derive(Config, Debug)]
pub struct DekrDecodeConfig {
    /// Poses whose center confidence falls below this are discarded.
    #[config(default = 0.05)]
    pub min_confidence: f32,
    #[config(default = 0.05)]
    pub keypoint_threshold: f32,
    /// Joint distance, relative to the pose size, under which two joints coincide.
    #[config(default = 0.05)]
    pub nms_threshold: f32,
    #[config(default = true)]
    pub apply_sigmoid: bool,
    #[config(default = 30)]
    pub max_num_people: usize,
    /// Number of coinciding joints that makes two poses duplicates.
    #[config(default = 8)]
    pub nms_num_threshold: usize,
    #[config(default = 4)]
    pub output_stride: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_config_defaults() {
        let config = QuantizationConfig::new();
        assert_eq!(config.num_bits, 8);
        assert!(config.narrow_range);
        assert!(config.per_channel_weights);
        assert!(config.input_amax.is_none());
    }

    #[test]
    fn decode_config_loads_partial_json() {
        let json = br#"{ "min_confidence": 0.3, "max_num_people": 5 }"#;
        let config = DekrDecodeConfig::load_binary(json).unwrap();

        assert_eq!(config.min_confidence, 0.3);
        assert_eq!(config.max_num_people, 5);
        assert_eq!(config.output_stride, OUTPUT_STRIDE);
        assert!(config.apply_sigmoid);
    }
}
