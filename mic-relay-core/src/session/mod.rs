pub mod controller;
pub mod gate;
mod relay;
