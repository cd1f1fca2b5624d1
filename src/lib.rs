#![recursion_limit = "256"]

pub mod coco_labels;
pub mod config;
pub mod error;
pub mod labels;
pub mod layers;
pub mod models;
pub mod nn;
pub mod pipeline;
pub mod quantization;
pub mod transforms;
