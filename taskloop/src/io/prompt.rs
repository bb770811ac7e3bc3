//! Prompt pack builder for the planner, executor, reflector and controller.
//!
//! Templates mark sections with `<!-- section:KEY required|droppable -->`.
//! The `contract` section becomes the system prompt; every other section is
//! joined into the single user message.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::io::completion::{ChatMessage, CompletionRequest};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");
const REFLECTOR_TEMPLATE: &str = include_str!("prompts/reflector.md");
const CONTROLLER_TEMPLATE: &str = include_str!("prompts/controller.md");

const CONTRACT_SECTION: &str = "contract";
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Droppable sections, least critical first.
const DROP_ORDER: [&str; 2] = ["history", "context"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("register planner template")?;
        env.add_template("executor", EXECUTOR_TEMPLATE)
            .context("register executor template")?;
        env.add_template("reflector", REFLECTOR_TEMPLATE)
            .context("register reflector template")?;
        env.add_template("controller", CONTROLLER_TEMPLATE)
            .context("register controller template")?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on section markers. Empty droppable sections are
/// omitted.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections, then truncate the last one, until the pack fits.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let removed = sections.remove(idx);
            debug!(
                section = key,
                bytes_dropped = removed.content.len(),
                "dropped section for budget"
            );
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(rest));
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Builds prompt packs within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Planner prompt. `context` is the serialized planning context.
    pub fn build_planner(&self, objective: &str, context: &str, revision: bool) -> Result<PromptPack> {
        self.build(
            "planner",
            context! {
                objective => objective.trim(),
                context => non_empty(context),
                revision => revision,
            },
        )
    }

    /// Executor prompt. `context` is the serialized execution context.
    pub fn build_executor(&self, task: &str, objective: &str, context: &str) -> Result<PromptPack> {
        self.build(
            "executor",
            context! {
                task => task.trim(),
                objective => objective.trim(),
                context => non_empty(context),
            },
        )
    }

    /// Reflector prompt over serialized history and plan.
    pub fn build_reflector(&self, objective: &str, plan: &str, history: &str) -> Result<PromptPack> {
        self.build(
            "reflector",
            context! {
                objective => objective.trim(),
                plan => plan.trim(),
                history => history.trim(),
            },
        )
    }

    /// Controller prompt over the serialized state snapshot and recent window.
    pub fn build_controller(&self, state: &str, history: &str) -> Result<PromptPack> {
        self.build(
            "controller",
            context! {
                state => state.trim(),
                history => non_empty(history),
            },
        )
    }

    fn build(&self, template: &str, ctx: minijinja::Value) -> Result<PromptPack> {
        let rendered = PromptEngine::new()?.render(template, ctx)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(PromptPack::from_sections(sections))
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// A rendered prompt split into system and user parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPack {
    system: String,
    user: String,
}

impl PromptPack {
    fn from_sections(sections: Vec<ParsedSection>) -> Self {
        let mut system = Vec::new();
        let mut user = Vec::new();
        for section in sections {
            if section.key == CONTRACT_SECTION {
                system.push(section.content);
            } else {
                user.push(section.content);
            }
        }
        Self {
            system: system.join("\n\n"),
            user: user.join("\n\n"),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_request(self, label: &'static str, temperature: f32) -> CompletionRequest {
        CompletionRequest {
            label,
            system_prompt: self.system,
            conversation: vec![ChatMessage::user(self.user)],
            temperature,
        }
    }
}
