use async_trait::async_trait;

use crate::config::DesktopConfig;
use crate::desktop::backend::{DesktopBackend, MouseButton};
use crate::errors::{PilotError, PilotResult};

/// HTTP implementation of the automation backend RPC surface.
pub struct HttpDesktopBackend {
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpDesktopBackend {
    pub fn new(api_base: String, api_key: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &DesktopConfig) -> Self {
        Self::new(cfg.api_base.clone(), cfg.resolved_api_key())
    }

    fn url(&self, session_id: &str, op: &str) -> String {
        format!("{}/sessions/{}/computer/{}", self.api_base, session_id, op)
    }

    /// POSTs one action; a non-success status is an action failure, not a
    /// transport failure.
    async fn post_action(
        &self,
        session_id: &str,
        op: &str,
        body: serde_json::Value,
    ) -> PilotResult<reqwest::Response> {
        tracing::debug!(session = session_id, op = op, "dispatching backend action");
        let response = self
            .client
            .post(self.url(session_id, op))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Backend(format!(
                "Failed to {op}: {status}: {err_body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl DesktopBackend for HttpDesktopBackend {
    async fn capture_screenshot(&self, session_id: &str) -> PilotResult<Vec<u8>> {
        let response = self
            .post_action(session_id, "screenshot", serde_json::json!({}))
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn click_mouse(
        &self,
        session_id: &str,
        x: i32,
        y: i32,
        button: MouseButton,
        num_clicks: u32,
    ) -> PilotResult<()> {
        self.post_action(
            session_id,
            "click_mouse",
            serde_json::json!({
                "x": x,
                "y": y,
                "button": button.as_str(),
                "num_clicks": num_clicks,
            }),
        )
        .await?;
        Ok(())
    }

    async fn move_mouse(&self, session_id: &str, x: i32, y: i32) -> PilotResult<()> {
        self.post_action(session_id, "move_mouse", serde_json::json!({ "x": x, "y": y }))
            .await?;
        Ok(())
    }

    async fn type_text(&self, session_id: &str, text: &str) -> PilotResult<()> {
        self.post_action(session_id, "type_text", serde_json::json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn press_key(&self, session_id: &str, keys: &[String]) -> PilotResult<()> {
        self.post_action(session_id, "press_key", serde_json::json!({ "keys": keys }))
            .await?;
        Ok(())
    }

    async fn scroll(
        &self,
        session_id: &str,
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
    ) -> PilotResult<()> {
        self.post_action(
            session_id,
            "scroll",
            serde_json::json!({ "x": x, "y": y, "delta_x": delta_x, "delta_y": delta_y }),
        )
        .await?;
        Ok(())
    }

    async fn drag_mouse(
        &self,
        session_id: &str,
        path: &[(i32, i32)],
        button: MouseButton,
    ) -> PilotResult<()> {
        let path_json: Vec<[i32; 2]> = path.iter().map(|&(x, y)| [x, y]).collect();
        self.post_action(
            session_id,
            "drag_mouse",
            serde_json::json!({ "path": path_json, "button": button.as_str() }),
        )
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> PilotResult<()> {
        tracing::info!(session = session_id, "tearing down backend session");
        let response = self
            .client
            .delete(format!("{}/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(PilotError::Backend(format!(
                "Failed to delete session: {status}"
            )));
        }
        Ok(())
    }
}
