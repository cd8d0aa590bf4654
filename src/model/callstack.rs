use crate::protocol::StackFrame;

#[derive(Debug, Clone, Default)]
pub struct CallstackModel {
    frames: Vec<StackFrame>,
    current_frame: Option<StackFrame>,
}

impl CallstackModel {
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.current_frame.as_ref()
    }

    pub fn frame(&self, frame_id: i64) -> Option<&StackFrame> {
        self.frames.iter().find(|frame| frame.id == frame_id)
    }

    /// Replace the frames; the top frame becomes current.
    pub(super) fn set_frames(&mut self, frames: Vec<StackFrame>) {
        self.current_frame = frames.first().cloned();
        self.frames = frames;
    }

    pub(super) fn select(&mut self, frame_id: i64) -> bool {
        match self.frame(frame_id).cloned() {
            Some(frame) => {
                self.current_frame = Some(frame);
                true
            }
            None => false,
        }
    }

    pub(super) fn clear(&mut self) {
        self.frames.clear();
        self.current_frame = None;
    }
}
