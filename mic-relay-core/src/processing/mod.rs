pub mod levels;
pub mod quantizer;
