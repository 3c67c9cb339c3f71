mod qwen;

pub use qwen::QwenParser;
