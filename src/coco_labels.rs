/// The Microsoft COCO (Common Objects in Context) keypoint task annotates every person with 17
/// body joints. The joint order below is the one used by the annotation files, a keypoint
/// vector of a COCO person is `[x0, y0, v0, x1, y1, v1, ..]` following this list.
///
/// “Microsoft COCO: Common Objects in Context”
/// Tsung-Yi Lin, Michael Maire, Serge Belongie, Lubomir Bourdev, Ross Girshick, James Hays, Pietro
/// Perona, Deva Ramanan, C. Lawrence Zitnick, Piotr Dollár
/// https:///arxiv.org/abs/1405.0312
///
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// Limbs drawn between joints, zero-based indices into [`COCO_KEYPOINTS`].
///
/// The annotation files list the same skeleton with one-based indices.
pub const COCO_EDGE_LINKS: [(usize, usize); 19] = [
    (15, 13),
    (13, 11),
    (16, 14),
    (14, 12),
    (11, 12),
    (5, 11),
    (6, 12),
    (5, 6),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (1, 2),
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (3, 5),
    (4, 6),
];

const FACE: [u8; 3] = [51, 153, 255];
const LEFT: [u8; 3] = [0, 255, 0];
const RIGHT: [u8; 3] = [255, 128, 0];
const TORSO: [u8; 3] = [255, 51, 255];

/// One color per entry of [`COCO_EDGE_LINKS`]: left limbs green, right limbs orange.
pub const COCO_EDGE_COLORS: [[u8; 3]; 19] = [
    LEFT, LEFT, RIGHT, RIGHT, TORSO, TORSO, TORSO, TORSO, LEFT, RIGHT, LEFT, RIGHT, FACE, FACE,
    FACE, FACE, FACE, FACE, FACE,
];

/// One color per entry of [`COCO_KEYPOINTS`].
pub const COCO_KEYPOINT_COLORS: [[u8; 3]; 17] = [
    FACE, FACE, FACE, FACE, FACE, LEFT, RIGHT, LEFT, RIGHT, LEFT, RIGHT, LEFT, RIGHT, LEFT, RIGHT,
    LEFT, RIGHT,
];
