//! Message types for conversational AI applications (§4.4/§4.5: the shape
//! every `ChatModel` request/response and every tool call/result passes
//! around).
//!
//! # Core Types
//!
//! ## [`Message`]
//!
//! The central message type representing a single message in a conversation:
//!
//! ```rust
//! use flow_core::messages::{Message, MessageRole};
//!
//! // Simple text message
//! let msg = Message::human("Hello, how are you?");
//!
//! // AI response
//! let response = Message::ai("I'm doing well, thanks for asking!");
//!
//! // System message
//! let system = Message::system("You are a helpful assistant.");
//! ```
//!
//! ## [`MessageRole`]
//!
//! Identifies the speaker in a conversation:
//! - **System** - Instructions or context for the AI
//! - **Human** - Messages from the user
//! - **Assistant/AI** - Responses from the AI model
//! - **Tool** - Results from tool executions
//!
//! ## [`MessageContent`]
//!
//! Flexible content representation supporting:
//! - Simple text strings
//! - Multi-part content (text + images)
//! - Structured data
//!
//! # Common Patterns
//!
//! ## Managing Tool Calls
//!
//! ```rust,ignore
//! use flow_core::messages::Message;
//! use flow_core::messages::ToolCall;
//!
//! // AI requests tool call
//! let ai_msg = Message::ai("Let me check that for you")
//!     .with_tool_calls(vec![
//!         ToolCall::new("search", serde_json::json!({"query": "weather"})),
//!     ]);
//!
//! // Tool response
//! let tool_msg = Message::tool(
//!     "Weather is sunny, 72°F",
//!     ai_msg.tool_calls[0].id.clone()
//! );
//! ```
//!
//! ## Multi-Modal Messages
//!
//! ```rust
//! use flow_core::messages::{Message, MessageContent, ContentPart};
//!
//! let image_message = Message::human(MessageContent::Parts(vec![
//!     ContentPart::text("What's in this image?"),
//!     ContentPart::image_url("https://example.com/image.jpg"),
//! ]));
//! ```
//!
//! # Message ID Management
//!
//! Messages can have IDs for tracking and deduplication:
//!
//! ```rust
//! use flow_core::messages::Message;
//!
//! // Explicit ID
//! let msg1 = Message::human("Hello").with_id("custom-id-123");
//!
//! // Auto-generate ID
//! let mut msg2 = Message::human("Hi");
//! msg2.ensure_id(); // Generates UUID if no ID exists
//! ```
//!
//! # See Also
//!
//! - [`crate::expr::Value`] - the expression evaluator's own tagged value type
//! - [`crate::scheduler`] - turns `ai`/`agent` node output into messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested by a model inside an assistant message.
///
/// Distinct from the tool executor's own call/result types (see the `tooling`
/// crate): this is the shape a provider's `generate`/`stream` response uses to
/// describe "please call this tool with these arguments".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Correlates the call with its eventual tool result message.
    pub id: String,
    /// Name of the tool being invoked.
    pub name: String,
    /// Arguments, as the provider emitted them.
    pub arguments: Value,
}

impl ToolCall {
    /// Build a new tool call with a freshly generated id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}
use uuid::Uuid;

/// Role of the message sender in a conversation.
///
/// Message roles define the **source and purpose** of each message in a conversation,
/// enabling proper routing, formatting, and processing by LLMs and agents.
///
/// # Role Semantics
///
/// - **System**: Context, instructions, and constraints for the conversation
/// - **Human**: Input from end users
/// - **Assistant**: Responses from AI agents
/// - **Tool**: Output from tool/function executions
/// - **Custom**: Application-specific roles
///
/// # Examples
///
/// ```rust
/// use flow_core::messages::{Message, MessageRole};
///
/// // System instructions
/// let system_msg = Message::new(
///     MessageRole::System,
///     "You are a helpful assistant. Be concise."
/// );
///
/// // Human query
/// let user_msg = Message::new(
///     MessageRole::Human,
///     "What is 2+2?"
/// );
///
/// // AI response
/// let ai_msg = Message::new(
///     MessageRole::Assistant,
///     "2+2 equals 4"
/// );
///
/// // Tool result
/// let tool_msg = Message::new(
///     MessageRole::Tool,
///     r#"{"result": 4, "operation": "add"}"#
/// );
///
/// // Custom role for specialized workflows
/// let custom_msg = Message::new(
///     MessageRole::Custom("moderator".to_string()),
///     "Content approved"
/// );
/// ```
///
/// # Serialization
///
/// Roles serialize to lowercase strings compatible with OpenAI/Anthropic APIs:
/// - `System` → `"system"`
/// - `Human` → `"human"`
/// - `Assistant` → `"assistant"`
/// - `Tool` → `"tool"`
/// - `Custom("x")` → `"x"`
///
/// # See Also
///
/// - [`Message`] - Message structure using this role type
/// - [`MessageContent`] - Content format for messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message providing instructions, context, or constraints.
    ///
    /// Used to set conversation parameters, guidelines, and behavioral expectations.
    System,

    /// Human/user message containing input or queries.
    ///
    /// Represents end-user input in the conversation flow.
    Human,

    /// AI assistant message containing generated responses.
    ///
    /// Represents output from LLM or agent reasoning.
    Assistant,

    /// Tool execution result message.
    ///
    /// Contains output from function/tool calls, typically in structured format.
    Tool,

    /// Custom application-specific role.
    ///
    /// Enables domain-specific message types beyond standard roles.
    Custom(String),
}

/// Individual content part in a multimodal message.
///
/// `ContentPart` enables **multimodal messages** by representing different content types
/// (text, images, etc.) that can be combined in a single message. This matches the
/// format used by modern LLM APIs (OpenAI, Anthropic, Google) for vision and multimodal capabilities.
///
/// # Content Types
///
/// - **Text**: Textual content with optional caching hints
/// - **Image**: Visual content via URL or base64 data
/// - **Custom**: Application-specific content types
///
/// # Examples
///
/// ## Simple Text Part
///
/// ```rust
/// use flow_core::messages::ContentPart;
///
/// let text_part = ContentPart::text("Describe this image");
/// ```
///
/// ## Image from URL
///
/// ```rust
/// # use flow_core::messages::ContentPart;
/// let image_part = ContentPart::image_url("https://example.com/photo.jpg");
/// ```
///
/// ## Image from Base64 Data
///
/// ```rust
/// # use flow_core::messages::ContentPart;
/// let image_part = ContentPart::image_data(
///     "image/png",
///     "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg=="
/// );
/// ```
///
/// ## Multimodal Message Composition
///
/// ```rust
/// use flow_core::messages::{Message, MessageRole, MessageContent, ContentPart};
///
/// let parts = vec![
///     ContentPart::text("What's in this image?"),
///     ContentPart::image_url("https://example.com/scene.jpg"),
/// ];
///
/// let multimodal_msg = Message {
///     id: Some("msg_1".to_string()),
///     role: MessageRole::Human,
///     content: MessageContent::Parts(parts),
///     name: None,
///     additional_kwargs: Default::default(),
/// };
/// ```
///
/// # Caching Support
///
/// Text parts support prompt caching for Anthropic's Claude API:
///
/// ```rust
/// # use flow_core::messages::ContentPart;
/// # use serde_json::json;
/// let cached_text = ContentPart::text_with_cache(
///     "Long system instructions...",
///     json!({"type": "ephemeral"})
/// );
/// ```
///
/// # Serialization Format
///
/// Serializes to tagged JSON compatible with LLM APIs:
///
/// ```json
/// // Text
/// {"type": "text", "text": "Hello"}
///
/// // Image URL
/// {"type": "image", "url": "https://..."}
///
/// // Image Base64
/// {
///   "type": "image",
///   "source": {
///     "type": "base64",
///     "media_type": "image/png",
///     "data": "iVBORw0K..."
///   }
/// }
/// ```
///
/// # See Also
///
/// - [`MessageContent`] - Container for one or more content parts
/// - [`Message`] - Full message structure
/// - [Anthropic Vision API](https://docs.anthropic.com/claude/docs/vision)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content with optional caching control.
    ///
    /// The primary content type for textual messages. Supports Anthropic's
    /// prompt caching when `cache_control` is specified.
    Text {
        /// The text content
        text: String,
        /// Optional cache control hints (Anthropic-specific)
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },

    /// Image content via URL or embedded data.
    ///
    /// Supports both URL references and base64-encoded image data.
    /// Use `ContentPart::image_url()` or `ContentPart::image_data()` constructors.
    Image {
        /// Image URL (mutually exclusive with source)
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Base64 image data with metadata (mutually exclusive with url)
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Value>,
    },

    /// Custom application-specific content type.
    ///
    /// Enables extension with domain-specific content formats.
    Custom {
        /// Arbitrary JSON data for custom content
        data: Value,
    },
}

impl ContentPart {
    /// Create a text content part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    /// Create a text content part with cache control
    pub fn text_with_cache(text: impl Into<String>, cache_control: Value) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: Some(cache_control),
        }
    }

    /// Create an image content part from URL
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            url: Some(url.into()),
            source: None,
        }
    }

    /// Create an image content part from base64 data
    pub fn image_data(media_type: &str, data: &str) -> Self {
        Self::Image {
            url: None,
            source: Some(serde_json::json!({
                "type": "base64",
                "media_type": media_type,
                "data": data
            })),
        }
    }
}

/// Message content representation supporting both simple text and multimodal parts.
///
/// `MessageContent` provides a **flexible content model** that can represent either:
/// - Simple string messages (most common case)
/// - Multimodal messages with multiple content parts (text + images, etc.)
///
/// This enum uses `#[serde(untagged)]` to allow seamless deserialization from both
/// JSON strings and arrays, matching LLM API formats.
///
/// # When to Use Each Variant
///
/// ## Text Variant
/// Use for standard text-only messages:
/// - Simple chat messages
/// - Tool results as strings
/// - System instructions
/// - Single-modality content
///
/// ## Parts Variant
/// Use for multimodal or structured content:
/// - Messages with images (vision tasks)
/// - Mixed text + image content
/// - Content with caching annotations
/// - Complex structured outputs
///
/// # Examples
///
/// ## Simple Text Content
///
/// ```rust
/// use flow_core::messages::{Message, MessageRole, MessageContent};
///
/// let msg = Message {
///     id: Some("msg_1".to_string()),
///     role: MessageRole::Human,
///     content: MessageContent::Text("Hello!".to_string()),
///     name: None,
///     additional_kwargs: Default::default(),
///   };
/// ```
///
/// ## Automatic String Conversion
///
/// ```rust
/// # use flow_core::messages::{Message, MessageContent};
/// // String implements Into<MessageContent>
/// let content: MessageContent = "Hello!".into();
/// let content2: MessageContent = String::from("World!").into();
/// ```
///
/// ## Multimodal Content
///
/// ```rust
/// use flow_core::messages::{MessageContent, ContentPart};
///
/// let multimodal = MessageContent::Parts(vec![
///     ContentPart::text("Analyze this image:"),
///     ContentPart::image_url("https://example.com/diagram.png"),
///     ContentPart::text("What patterns do you see?"),
/// ]);
/// ```
///
/// ## Mixed Content with Vision
///
/// ```rust
/// # use flow_core::messages::{Message, MessageRole, MessageContent, ContentPart};
/// let vision_msg = Message {
///     id: Some("vision_1".to_string()),
///     role: MessageRole::Human,
///     content: MessageContent::Parts(vec![
///         ContentPart::text("Compare these two images:"),
///         ContentPart::image_url("https://example.com/before.jpg"),
///         ContentPart::image_url("https://example.com/after.jpg"),
///     ]),
///     name: None,
///     additional_kwargs: Default::default(),
/// };
/// ```
///
/// # JSON Serialization
///
/// The untagged serialization means:
///
/// ```json
/// // Text variant
/// "Hello, world!"
///
/// // Parts variant
/// [
///   {"type": "text", "text": "Hello"},
///   {"type": "image", "url": "https://..."}
/// ]
/// ```
///
/// # Migration Path
///
/// When upgrading from text-only to multimodal:
///
/// ```rust
/// # use flow_core::messages::{MessageContent, ContentPart};
/// // Before: Text-only
/// let old_content = MessageContent::Text("Hello".to_string());
///
/// // After: Multimodal-ready
/// let new_content = MessageContent::Parts(vec![
///     ContentPart::text("Hello"),
///     // Can now add images without changing structure
/// ]);
/// ```
///
/// # Performance Notes
///
/// - `Text` variant is zero-cost wrapper around String
/// - `Parts` variant allocates Vec, use for multimodal only
/// - Automatic conversions from `&str`/`String` are zero-copy when possible
///
/// # See Also
///
/// - [`ContentPart`] - Individual content part types
/// - [`Message`] - Full message structure using this content type
/// - [`MessageRole`] - Message sender role types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text-only content.
    ///
    /// The most common case for standard chat messages. Automatically
    /// used when constructing messages from strings.
    Text(String),

    /// Structured multimodal content with multiple parts.
    ///
    /// Enables vision, mixed content, and advanced formatting.
    /// Use when you need images, caching, or complex layouts.
    Parts(Vec<ContentPart>),
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// Base message type for conversational AI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Role of the message sender
    pub role: MessageRole,

    /// Message content
    pub content: MessageContent,

    /// Optional message name (for system messages, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls (for assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call ID (for tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Additional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// Create a new message with the given role and content
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            metadata: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a human message
    pub fn human(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an AI assistant message (alias for `assistant`)
    ///
    /// This is a convenience method that's equivalent to `Message::assistant()`.
    /// Use whichever naming convention you prefer.
    ///
    /// # Example
    ///
    /// ```rust
    /// use flow_core::messages::Message;
    ///
    /// let msg = Message::ai("Hello from AI!");
    /// assert_eq!(msg.text(), Some("Hello from AI!"));
    /// ```
    pub fn ai(content: impl Into<MessageContent>) -> Self {
        Self::assistant(content)
    }

    /// Create a user message (alias for `human`)
    ///
    /// This is a convenience method that's equivalent to `Message::human()`.
    /// Use whichever naming convention you prefer.
    ///
    /// # Example
    ///
    /// ```rust
    /// use flow_core::messages::Message;
    ///
    /// let msg = Message::user("Hello from user!");
    /// assert_eq!(msg.text(), Some("Hello from user!"));
    /// ```
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::human(content)
    }

    /// Create a tool message
    pub fn tool(content: impl Into<MessageContent>, tool_call_id: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role: MessageRole::Tool,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            metadata: None,
        }
    }

    /// Set the message ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the message name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set tool calls (for assistant messages)
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Get the text content if this is a simple text message
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }

    /// Ensure this message has an ID (generate one if missing)
    pub fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::human("Hello world");
        assert_eq!(msg.role, MessageRole::Human);
        assert_eq!(msg.text(), Some("Hello world"));
        assert!(msg.id.is_some());
    }

    #[test]
    fn test_message_ai_alias() {
        // Test that Message::ai() is an alias for Message::assistant()
        let ai_msg = Message::ai("AI response");
        let assistant_msg = Message::assistant("AI response");

        assert_eq!(ai_msg.role, MessageRole::Assistant);
        assert_eq!(ai_msg.role, assistant_msg.role);
        assert_eq!(ai_msg.text(), Some("AI response"));
    }

    #[test]
    fn test_message_user_alias() {
        // Test that Message::user() is an alias for Message::human()
        let user_msg = Message::user("User input");
        let human_msg = Message::human("User input");

        assert_eq!(user_msg.role, MessageRole::Human);
        assert_eq!(user_msg.role, human_msg.role);
        assert_eq!(user_msg.text(), Some("User input"));
    }

    #[test]
    fn test_message_with_id() {
        let msg = Message::assistant("Response").with_id("msg_123");
        assert_eq!(msg.id, Some("msg_123".to_string()));
    }

    #[test]
    fn test_tool_message() {
        let msg = Message::tool("Result", "call_123");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_message_with_tool_calls() {
        let msg = Message::assistant("Let me search").with_tool_calls(vec![ToolCall::new("search", serde_json::json!({"query": "test"}))]);

        assert!(msg.tool_calls.is_some());
        assert_eq!(msg.tool_calls.unwrap().len(), 1);
    }

    #[test]
    fn test_content_parts() {
        let parts = vec![
            ContentPart::text("Hello"),
            ContentPart::image_url("https://example.com/image.jpg"),
        ];
        let msg = Message::human(MessageContent::Parts(parts));

        match msg.content {
            MessageContent::Parts(p) => assert_eq!(p.len(), 2),
            _ => panic!("Expected Parts"),
        }
    }
}
