use serde::{Deserialize, Serialize};

use crate::image::ImageAttachment;

pub const SUGGESTION_COUNT: usize = 6;

const DEFAULT_OCCASION: &str = "Any occasion";
const DEFAULT_BUDGET: &str = "Flexible";
const DEFAULT_RECIPIENT: &str = "None";

/// Context a user fills in before asking for suggestions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GiftRequest {
    pub occasion: String,
    pub recipient: String,
    pub budget: String,
    pub image: Option<ImageAttachment>,
}

impl GiftRequest {
    #[cfg(test)]
    pub fn new(
        occasion: impl Into<String>,
        recipient: impl Into<String>,
        budget: impl Into<String>,
    ) -> Self {
        Self {
            occasion: occasion.into(),
            recipient: recipient.into(),
            budget: budget.into(),
            image: None,
        }
    }

    #[cfg(test)]
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn source(&self) -> PromptSource {
        if self.image.is_some() {
            PromptSource::Image
        } else {
            PromptSource::Text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSource {
    Text,
    Image,
}

/// Instruction text plus an optional image sent as its own part.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl Prompt {
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn source(&self) -> PromptSource {
        if self.image.is_some() {
            PromptSource::Image
        } else {
            PromptSource::Text
        }
    }
}

/// Builds the model instruction for a gift request.
pub struct PromptBuilder {
    text_template: String,
    image_template: String,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            text_template: output_template(
                "[2-3 sentence description of the gift]",
                "[2-3 sentence description of the gift]",
                "Electronics, Fashion, Books, etc.",
            ),
            image_template: output_template(
                "[2-3 sentence description explaining why this gift suits the person based on the image]",
                "[2-3 sentence description]",
                "Electronics, Fashion, Books, Sports, etc.",
            ),
        }
    }

    pub fn build(&self, request: &GiftRequest) -> Prompt {
        let text = match request.source() {
            PromptSource::Text => self.build_text_prompt(request),
            PromptSource::Image => self.build_image_prompt(request),
        };
        Prompt {
            text,
            image: request.image.clone(),
        }
    }

    fn build_text_prompt(&self, request: &GiftRequest) -> String {
        format!(
            "I need gift suggestions based on the following information:

Occasion: {occasion}
Recipient Information: {recipient}
Budget: {budget}

Please provide exactly {count} unique and thoughtful gift suggestions in this EXACT format:

{template}

Make sure the suggestions are:
- Unique and creative
- Within the specified budget
- Appropriate for the occasion
- Personalized based on recipient information
- Practical and thoughtful",
            occasion = or_default(&request.occasion, DEFAULT_OCCASION),
            recipient = or_default(&request.recipient, DEFAULT_RECIPIENT),
            budget = or_default(&request.budget, DEFAULT_BUDGET),
            count = SUGGESTION_COUNT,
            template = self.text_template,
        )
    }

    fn build_image_prompt(&self, request: &GiftRequest) -> String {
        format!(
            "Analyze this image and suggest {count} unique and thoughtful gifts based on what you see.
Consider the person's interests, style, hobbies, or context shown in the image.

Additional context:
Occasion: {occasion}
Budget: {budget}
Additional info: {recipient}

Provide exactly {count} gift suggestions in this EXACT format:

{template}

Make the suggestions creative, personalized, and based on visual cues from the image.",
            occasion = or_default(&request.occasion, DEFAULT_OCCASION),
            budget = or_default(&request.budget, DEFAULT_BUDGET),
            recipient = or_default(&request.recipient, DEFAULT_RECIPIENT),
            count = SUGGESTION_COUNT,
            template = self.image_template,
        )
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The record layout the model is asked to follow. Only the first record
/// carries the detailed hints.
fn output_template(first_description: &str, description: &str, categories: &str) -> String {
    format!(
        "GIFT 1:
NAME: [Gift name]
PRICE: [Estimated price range]
DESCRIPTION: {first_description}
OCCASION: [Suitable occasions]
CATEGORY: [Gift category like {categories}]

GIFT 2:
NAME: [Gift name]
PRICE: [Estimated price range]
DESCRIPTION: {description}
OCCASION: [Suitable occasions]
CATEGORY: [Gift category]

[Continue for all {count} gifts]",
        count = SUGGESTION_COUNT,
    )
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { default } else { trimmed }
}
