pub mod factory;
pub mod pose_head;
pub mod vgg;
pub mod yolo_nas_pose;

pub use factory::{ModelBuilder, ModelFactory, build_yolo_nas_pose};
pub use pose_head::{PoseHeadParams, YoloNasPoseHead};
pub use vgg::VggBackbone;
pub use yolo_nas_pose::{PoseProcessingParams, YoloNasPose, YoloNasPoseConfig};
