use crate::{
    coco_labels::{COCO_EDGE_COLORS, COCO_EDGE_LINKS, COCO_KEYPOINT_COLORS, COCO_KEYPOINTS},
    error::PredictionError,
};

/// Joints of a pose model and how they are connected and colored when rendered.
///
/// A skeleton is always consistent: it has one keypoint color per joint, one edge color per
/// link and every link references existing joints. [`PoseSkeleton::new`] checks this.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSkeleton {
    num_joints: usize,
    joint_names: Vec<String>,
    edge_links: Vec<(usize, usize)>,
    edge_colors: Vec<[u8; 3]>,
    keypoint_colors: Vec<[u8; 3]>,
}

impl PoseSkeleton {
    /// Creates a skeleton for `num_joints` joints.
    ///
    /// # Errors
    ///
    /// * [`PredictionError::KeypointColorMismatch`] if there is not one keypoint color per
    ///   joint.
    /// * [`PredictionError::EdgeColorMismatch`] if there is not one edge color per link.
    /// * [`PredictionError::InvalidEdgeLink`] if a link references a joint `>= num_joints`.
    pub fn new(
        num_joints: usize,
        edge_links: Vec<(usize, usize)>,
        edge_colors: Vec<[u8; 3]>,
        keypoint_colors: Vec<[u8; 3]>,
    ) -> Result<Self, PredictionError> {
        if keypoint_colors.len() != num_joints {
            return Err(PredictionError::KeypointColorMismatch {
                colors: keypoint_colors.len(),
                joints: num_joints,
            });
        }
        if edge_colors.len() != edge_links.len() {
            return Err(PredictionError::EdgeColorMismatch {
                colors: edge_colors.len(),
                links: edge_links.len(),
            });
        }
        if let Some(&(a, b)) = edge_links
            .iter()
            .find(|(a, b)| *a >= num_joints || *b >= num_joints)
        {
            return Err(PredictionError::InvalidEdgeLink(a, b));
        }

        Ok(Self {
            num_joints,
            joint_names: (0..num_joints).map(|i| format!("joint_{i}")).collect(),
            edge_links,
            edge_colors,
            keypoint_colors,
        })
    }

    /// The 17 joint COCO person skeleton.
    pub fn coco17() -> Self {
        Self {
            num_joints: COCO_KEYPOINTS.len(),
            joint_names: COCO_KEYPOINTS.iter().map(|name| name.to_string()).collect(),
            edge_links: COCO_EDGE_LINKS.to_vec(),
            edge_colors: COCO_EDGE_COLORS.to_vec(),
            keypoint_colors: COCO_KEYPOINT_COLORS.to_vec(),
        }
    }

    /// Replaces the generated `joint_{i}` names. Extra names are ignored, missing ones keep
    /// their generated name.
    pub fn with_joint_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for (slot, name) in self.joint_names.iter_mut().zip(names) {
            *slot = name.as_ref().to_owned();
        }
        self
    }

    pub fn num_joints(&self) -> usize {
        self.num_joints
    }

    pub fn joint_name(&self, joint: usize) -> Option<&str> {
        self.joint_names.get(joint).map(String::as_str)
    }

    /// Index of the joint called `name`, if any.
    pub fn joint_id(&self, name: &str) -> Option<usize> {
        self.joint_names.iter().position(|joint| joint == name)
    }

    pub fn edge_links(&self) -> &[(usize, usize)] {
        &self.edge_links
    }

    pub fn edge_colors(&self) -> &[[u8; 3]] {
        &self.edge_colors
    }

    pub fn keypoint_colors(&self) -> &[[u8; 3]] {
        &self.keypoint_colors
    }

    /// Links with their colors.
    pub fn edges(&self) -> impl Iterator<Item = ((usize, usize), [u8; 3])> + '_ {
        self.edge_links
            .iter()
            .copied()
            .zip(self.edge_colors.iter().copied())
    }
}
