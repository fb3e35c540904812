pub mod ffmpeg;

pub use ffmpeg::AudioProcessor;
