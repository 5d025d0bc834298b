pub mod codec;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod session;
pub mod visual;

/// BEV classes of the nuScenes occupancy maps. The order defines the bit order
/// of packed label rasters.
pub const NUSCENES_CLASS_NAMES: [&str; 14] = [
    "drivable_area",
    "ped_crossing",
    "walkway",
    "carpark",
    "car",
    "truck",
    "bus",
    "trailer",
    "construction_vehicle",
    "pedestrian",
    "motorcycle",
    "bicycle",
    "traffic_cone",
    "barrier",
];

pub const DEFAULT_CAMERA_CHANNEL: &str = "CAM_FRONT";
