pub mod application;
pub mod input;
pub mod render;
