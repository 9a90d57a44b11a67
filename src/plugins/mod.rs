pub mod detect;
pub mod drift;
pub mod lifecycle;
pub mod notes;
pub mod registry;
pub mod render;
pub mod scanner;
