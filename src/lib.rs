pub mod anchor_target;
pub mod boxes;
pub mod config;
pub mod debug;
pub mod error;
pub mod labels;
pub mod scene;
pub mod stats;
pub mod tensor_ops;
pub mod transforms;
