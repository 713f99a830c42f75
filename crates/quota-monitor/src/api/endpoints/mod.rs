pub mod objects;
pub mod render;
pub mod status;
