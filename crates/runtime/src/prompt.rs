//! System prompt assembly.

use serde::{Deserialize, Serialize};

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant for FiftyOne, a tool for \
building high-quality datasets and computer vision models.";

/// The dataset the user is working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetContext {
    pub name: String,
    pub sample_count: u64,
    pub media_type: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// A named block of extra instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub content: String,
}

/// Builder for the system prompt passed to a turn.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    instructions: String,
    dataset: Option<DatasetContext>,
    context: Vec<String>,
    skills: Vec<Skill>,
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS)
    }
}

impl SystemPrompt {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            dataset: None,
            context: Vec::new(),
            skills: Vec::new(),
        }
    }

    pub fn with_dataset(mut self, dataset: DatasetContext) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Append free-form context. Blank text is ignored.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context.push(context);
        }
        self
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn render(&self) -> String {
        let mut prompt = self.instructions.trim_end().to_string();

        if let Some(dataset) = &self.dataset {
            prompt.push_str(&format!(
                "\n\nDataset: '{}' with {} samples.\nMedia type: {}",
                dataset.name, dataset.sample_count, dataset.media_type
            ));
            if !dataset.fields.is_empty() {
                prompt.push_str(&format!("\nFields: {}", dataset.fields.join(", ")));
            }
        }

        for context in &self.context {
            prompt.push_str("\n\n");
            prompt.push_str(context.trim());
        }

        for skill in &self.skills {
            prompt.push_str(&format!("\n\n## Skill: {}\n{}", skill.name, skill.content.trim()));
        }

        prompt
    }
}

impl std::fmt::Display for SystemPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
