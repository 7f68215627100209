use async_trait::async_trait;

use crate::errors::PilotResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
        }
    }
}

/// Remote desktop automation backend, addressed by session id. One session
/// handle is exclusively owned by one turn loop at a time.
///
/// Errors returned as `PilotError::Backend` mean the action itself failed
/// and are recoverable; transport errors (`PilotError::Http`) abort the loop.
#[async_trait]
pub trait DesktopBackend: Send + Sync {
    /// Captures the current screen as PNG bytes.
    async fn capture_screenshot(&self, session_id: &str) -> PilotResult<Vec<u8>>;

    async fn click_mouse(
        &self,
        session_id: &str,
        x: i32,
        y: i32,
        button: MouseButton,
        num_clicks: u32,
    ) -> PilotResult<()>;

    async fn move_mouse(&self, session_id: &str, x: i32, y: i32) -> PilotResult<()>;

    async fn type_text(&self, session_id: &str, text: &str) -> PilotResult<()>;

    /// Presses the given keys (X11 keysym names).
    async fn press_key(&self, session_id: &str, keys: &[String]) -> PilotResult<()>;

    async fn scroll(
        &self,
        session_id: &str,
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
    ) -> PilotResult<()>;

    /// Drags the mouse along `path` (ordered [x, y] waypoints).
    async fn drag_mouse(
        &self,
        session_id: &str,
        path: &[(i32, i32)],
        button: MouseButton,
    ) -> PilotResult<()>;

    /// Tears the session down. Called once when the loop ends fatally.
    async fn delete_session(&self, session_id: &str) -> PilotResult<()>;
}
