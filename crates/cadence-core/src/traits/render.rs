//! Template renderer trait.

use crate::types::{MessageTemplate, RenderedMessage};

/// Pure function from a connection template to the payload delivered downstream.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &MessageTemplate) -> RenderedMessage;
}
