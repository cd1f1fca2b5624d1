use std::{collections::BTreeMap, fmt};

use burn::tensor::backend::Backend;
use serde_json::Value;
use tracing::{debug, info};

use super::yolo_nas_pose::{PoseProcessingParams, YoloNasPose, YoloNasPoseConfig};
use crate::{coco_labels::COCO_KEYPOINTS, error::ModelError};

/// Builds a model from its (merged) architecture config.
pub type ModelBuilder<B> = fn(&YoloNasPoseConfig, &<B as Backend>::Device) -> Result<YoloNasPose<B>, ModelError>;

struct FactoryEntry<B: Backend> {
    default_config: YoloNasPoseConfig,
    builder: ModelBuilder<B>,
}

/// Named model variants, each a default architecture config plus a builder.
///
/// [`ModelFactory::new`] knows `yolo_nas_pose_s`, `yolo_nas_pose_m` and `yolo_nas_pose_l`.
pub struct ModelFactory<B: Backend> {
    entries: BTreeMap<&'static str, FactoryEntry<B>>,
}

impl<B: Backend> fmt::Debug for ModelFactory<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFactory")
            .field("names", &self.names())
            .finish()
    }
}

impl<B: Backend> Default for ModelFactory<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ModelFactory<B> {
    /// A factory with the YOLO-NAS-Pose variants registered.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register("yolo_nas_pose_s", YoloNasPoseConfig::new(), build_yolo_nas_pose::<B>);
        factory.register(
            "yolo_nas_pose_m",
            YoloNasPoseConfig::new()
                .with_backbone_widths(vec![48, 96, 192, 384, 576])
                .with_backbone_depths(vec![2, 2, 3, 3, 2])
                .with_inter_channels(160)
                .with_channels_per_kpt(24)
                .with_num_blocks(2),
            build_yolo_nas_pose::<B>,
        );
        factory.register(
            "yolo_nas_pose_l",
            YoloNasPoseConfig::new()
                .with_backbone_widths(vec![64, 128, 256, 512, 768])
                .with_backbone_depths(vec![2, 3, 4, 4, 3])
                .with_inter_channels(192)
                .with_channels_per_kpt(32)
                .with_num_blocks(3),
            build_yolo_nas_pose::<B>,
        );
        factory
    }

    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers a variant. Returns `true` when an existing variant of that name was
    /// replaced.
    pub fn register(
        &mut self,
        name: &'static str,
        default_config: YoloNasPoseConfig,
        builder: ModelBuilder<B>,
    ) -> bool {
        debug!(name, "registering model");
        self.entries
            .insert(
                name,
                FactoryEntry {
                    default_config,
                    builder,
                },
            )
            .is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn default_config(&self, name: &str) -> Option<&YoloNasPoseConfig> {
        self.entries.get(name).map(|entry| &entry.default_config)
    }

    /// Builds the variant `name`.
    ///
    /// `overrides` is a JSON object merged over the variant's default config, nested
    /// objects key by key, anything else replacing the default value.
    ///
    /// # Errors
    ///
    /// * [`ModelError::UnknownModel`] listing the registered names.
    /// * [`ModelError::InvalidArchParams`] when `overrides` is not an object or the builder
    ///   rejects the merged config.
    /// * [`ModelError::Overrides`] when the merged config does not deserialize.
    pub fn get(
        &self,
        name: &str,
        overrides: Option<&Value>,
        device: &B::Device,
    ) -> Result<YoloNasPose<B>, ModelError> {
        let entry = self.entries.get(name).ok_or_else(|| ModelError::UnknownModel {
            name: name.to_owned(),
            available: self.names(),
        })?;

        let config = match overrides {
            None => entry.default_config.clone(),
            Some(overrides @ Value::Object(_)) => {
                let mut merged = serde_json::to_value(&entry.default_config)?;
                merge_json(&mut merged, overrides);
                serde_json::from_value(merged)?
            }
            Some(other) => {
                return Err(ModelError::InvalidArchParams(format!(
                    "architecture overrides must be a JSON object, got {other}"
                )));
            }
        };

        let model = (entry.builder)(&config, device)?;
        info!(name, num_classes = config.num_classes, "model built");
        Ok(model)
    }
}

fn merge_json(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

/// Builds a [`YoloNasPose`], with the COCO processing params for 17 joint models.
pub fn build_yolo_nas_pose<B: Backend>(
    config: &YoloNasPoseConfig,
    device: &B::Device,
) -> Result<YoloNasPose<B>, ModelError> {
    let mut model = YoloNasPose::new(config, device)?;
    if config.num_classes == COCO_KEYPOINTS.len() {
        model.set_dataset_processing_params(PoseProcessingParams::coco17());
    }
    Ok(model)
}
