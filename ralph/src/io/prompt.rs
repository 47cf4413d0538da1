//! Instruction text handed to the assistant.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::TaskRef;

const TASK_TEMPLATE: &str = include_str!("prompts/task.txt");
const BATCH_CHECK_TEMPLATE: &str = include_str!("prompts/batch_check.txt");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        env.add_template("batch_check", BATCH_CHECK_TEMPLATE)
            .expect("batch check template should be valid");
        Self { env }
    }
}

/// Skill invocation for one task, with an optional retry note as a second paragraph.
pub fn render_task_instruction(skill: &str, task: &TaskRef, note: Option<&str>) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("task")?;
    let rendered = template.render(context! {
        skill => skill.trim_start_matches('/'),
        task => task.to_string(),
        note => note.map(str::trim).filter(|s| !s.is_empty()),
    })?;
    Ok(rendered.trim().to_string())
}

pub fn render_batch_check(skill: &str, tasks: &[TaskRef]) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("batch_check")?;
    let rendered = template.render(context! {
        skill => skill.trim_start_matches('/'),
        tasks => tasks.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })?;
    Ok(rendered.trim().to_string())
}
