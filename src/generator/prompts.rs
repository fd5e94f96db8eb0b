//! Prompt templates

use crate::markup::to_plain_text;

/// Article request; the answer must be a single JSON object
pub fn article(topic: &str) -> String {
    format!(
        r#"You are a professional blogger who writes engaging, well-formatted articles on various topics.
Based on the user's input, generate a full blog post that includes:
- A catchy title (not just a statement)
- Well-structured paragraphs
- HTML-style formatting such as:
  - <strong>Bold text</strong>
  - <em>Italic text</em>
  - <h3>Subheadings</h3>
  - <ul><li>Unordered lists</li></ul>
  - <br> line breaks between paragraphs

Return your response in strict JSON format with the following keys:
{{
  "title": "The Title",
  "content": "Formatted blog content here...",
  "tags": ["tag1", "tag2"]
}}

Make sure the JSON is valid and properly escaped.
Do not include extra explanations, just return the JSON.

Here's the topic: "{}""#,
        topic.replace('"', "'")
    )
}

/// Ask for a short visual description of an article to feed the image model
pub fn image_description(body: &str) -> String {
    format!(
        r#"You are a creative assistant helping bloggers generate relevant image prompts for their articles.
Based on the following blog content, create a short, vivid visual description suitable for generating an image.

Requirements:
- Keep it concise (1-2 sentences)
- Focus on themes, mood, colors, and visual elements
- Avoid markdown formatting
- Do not mention logos or text overlays

Blog Content:
"{}""#,
        to_plain_text(body).trim()
    )
}
