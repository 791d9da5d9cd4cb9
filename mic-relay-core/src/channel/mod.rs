pub mod frame_channel;
