use crate::window_api::WindowHandle;

/// Window signals the tracker cares about. Both count as activity in the owning program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEventKind {
    FocusChanged,
    LocationChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvent {
    pub kind: WindowEventKind,
    pub window: WindowHandle,
}
