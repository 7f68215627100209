//! Conversation history sent to the model on every turn.
//!
//! Shape matters to the provider: tool results must reference the call id,
//! screenshots go back as a separate user-role image message so vision
//! models actually look at them, and content is never null.

use crate::llm::types::{ChatMessage, ContentPart, ImageUrl, MessageContent, ToolCall};

const OPERATOR_INSTRUCTIONS: &str = include_str!("../../prompts/system.md");

/// Acknowledgement recorded as the tool result for a screenshot; the image
/// itself travels in the follow-up user message.
fn screenshot_ack(timestamp: &str) -> String {
    format!("Screenshot captured successfully at {timestamp}")
}

fn screenshot_analysis_prompt(width: u32, height: u32) -> String {
    format!(
        "Here is the current screenshot of the sandbox. Analyze it carefully before your next action.\n\n\
         SCREEN: {width}x{height} pixels | Origin: (0,0) at TOP-LEFT\n\
         REMEMBER: Y=0 is at TOP, Y increases DOWNWARD\n\
         FORMAT: [X, Y] - horizontal first, then vertical\n\
         Describe what you see and decide on the next action."
    )
}

/// Ordered message log for one session.
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Starts from the operator instructions plus the client's messages.
    /// Client messages with missing content are normalized to empty text.
    pub fn new(mut client_messages: Vec<ChatMessage>) -> Self {
        let mut messages = vec![ChatMessage::text("system", OPERATOR_INSTRUCTIONS)];
        messages.append(&mut client_messages);
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push_assistant_text(&mut self, text: &str) {
        self.messages.push(ChatMessage::text("assistant", text));
    }

    /// The action itself, as its own assistant message with empty content.
    pub fn push_assistant_tool_call(&mut self, call: ToolCall) {
        self.messages.push(ChatMessage {
            role: "assistant".into(),
            content: MessageContent::Text(String::new()),
            tool_call_id: None,
            tool_calls: Some(vec![call]),
        });
    }

    pub fn push_tool_result(&mut self, call_id: &str, content: &str) {
        self.messages.push(ChatMessage {
            role: "tool".into(),
            content: MessageContent::Text(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        });
    }

    /// Records a screenshot as two messages: a short tool-role ack tied to
    /// the call, then a user-role message carrying the image as a data URL
    /// with an analysis prompt.
    pub fn push_screenshot(
        &mut self,
        call_id: &str,
        image_b64: &str,
        timestamp: &str,
        width: u32,
        height: u32,
    ) {
        self.push_tool_result(call_id, &screenshot_ack(timestamp));
        self.messages.push(ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: screenshot_analysis_prompt(width, height),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{image_b64}"),
                    },
                },
            ]),
            tool_call_id: None,
            tool_calls: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FunctionCall;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "computer_use".into(),
                arguments: r#"{"action": "screenshot"}"#.into(),
            },
        }
    }

    #[test]
    fn starts_with_system_instructions() {
        let h = ChatHistory::new(vec![ChatMessage::text("user", "pogoda w Warszawie")]);
        assert_eq!(h.messages()[0].role, "system");
        assert_eq!(h.messages()[1].role, "user");
    }

    #[test]
    fn tool_call_message_has_empty_content() {
        let mut h = ChatHistory::new(vec![]);
        h.push_assistant_tool_call(call("call_1"));
        let msg = h.messages().last().unwrap();
        assert_eq!(msg.content.as_text(), Some(""));
        assert_eq!(msg.tool_calls.as_ref().unwrap()[0].id, "call_1");
    }

    #[test]
    fn screenshot_becomes_ack_plus_user_image() {
        let mut h = ChatHistory::new(vec![]);
        h.push_screenshot("call_1", "AAAA", "2026-08-27T12:00:00Z", 1024, 768);

        let n = h.messages().len();
        let ack = &h.messages()[n - 2];
        assert_eq!(ack.role, "tool");
        assert_eq!(ack.tool_call_id.as_deref(), Some("call_1"));
        assert!(ack.content.as_text().unwrap().contains("2026-08-27T12:00:00Z"));

        let image = &h.messages()[n - 1];
        assert_eq!(image.role, "user");
        match &image.content {
            MessageContent::Parts(parts) => {
                assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains("1024x768")));
                assert!(matches!(
                    &parts[1],
                    ContentPart::ImageUrl { image_url } if image_url.url == "data:image/png;base64,AAAA"
                ));
            }
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }
}
