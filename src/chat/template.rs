//! ChatML framing used by Qwen2.5-VL.

pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";

/// Stands in for one image; the engine expands it to the image's patch tokens.
pub const IMAGE_PLACEHOLDER: &str = "<|vision_start|><|image_pad|><|vision_end|>";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TOOL_SYSTEM_PROMPT: &str =
    "You are Qwen, created by Alibaba Cloud. You are a helpful assistant.";

/// Incremental prompt writer.
#[derive(Debug, Default)]
pub struct PromptWriter {
    out: String,
    /// Bytes written since the current turn's header.
    turn_len: usize,
    open: bool,
}

impl PromptWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_turn(&mut self, role: &str) {
        debug_assert!(!self.open, "turn already open");
        self.out.push_str(IM_START);
        self.out.push_str(role);
        self.out.push('\n');
        self.turn_len = 0;
        self.open = true;
    }

    pub fn push_str(&mut self, text: &str) {
        self.out.push_str(text);
        self.turn_len += text.len();
    }

    pub fn push_image(&mut self) {
        self.push_str(IMAGE_PLACEHOLDER);
    }

    /// Start a new block inside the open turn, separated from earlier
    /// content by a newline.
    pub fn push_block(&mut self, block: &str) {
        if self.turn_len > 0 {
            self.push_str("\n");
        }
        self.push_str(block);
    }

    pub fn turn_is_empty(&self) -> bool {
        self.turn_len == 0
    }

    pub fn close_turn(&mut self) {
        if self.open {
            self.out.push_str(IM_END);
            self.out.push('\n');
            self.open = false;
        }
    }

    /// Close the conversation and cue the assistant's reply.
    pub fn finish(mut self) -> String {
        self.close_turn();
        self.out.push_str(IM_START);
        self.out.push_str("assistant\n");
        self.out
    }
}
