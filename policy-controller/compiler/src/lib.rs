#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Renders typed policy rules into evaluation-engine programs.
//!
//! Rendering is a pure function of the rule. A rendered program is then
//! formatted and checked by the engine before it is accepted, so a rule that
//! cannot produce a well-formed program fails loudly at compile time rather
//! than at admission time.

mod model;

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use praetor_policy_core::{Engine, EngineError};
use praetor_policy_k8s_api::policy::{
    OverrideRuleTemplate, OverrideTemplateType, ValidateRuleTemplate, ValidateTemplateType,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to render {template} template: {source}")]
    Render {
        template: &'static str,
        #[source]
        source: minijinja::Error,
    },

    #[error("rendered program failed to format: {0}")]
    Format(#[source] EngineError),

    #[error("rendered program failed validation: {0}")]
    Validate(#[source] EngineError),

    #[error("{kind} template cannot be rendered: {reason}")]
    NotRenderable { kind: String, reason: String },
}

const TEMPLATES: &[(&str, &str)] = &[
    ("inputs.cue.j2", include_str!("../templates/inputs.cue.j2")),
    ("podspec.cue.j2", include_str!("../templates/podspec.cue.j2")),
    ("metadata.cue.j2", include_str!("../templates/metadata.cue.j2")),
    ("resources.cue.j2", include_str!("../templates/resources.cue.j2")),
    ("oversell.cue.j2", include_str!("../templates/oversell.cue.j2")),
    ("tolerations.cue.j2", include_str!("../templates/tolerations.cue.j2")),
    ("affinity.cue.j2", include_str!("../templates/affinity.cue.j2")),
    ("condition.cue.j2", include_str!("../templates/condition.cue.j2")),
    ("badge.cue.j2", include_str!("../templates/badge.cue.j2")),
];

/// Renders and checks rule programs.
#[derive(Clone)]
pub struct Compiler {
    env: Arc<Environment<'static>>,
    engine: Arc<dyn Engine>,
}

// === impl Compiler ===

impl Compiler {
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self {
            env: Arc::new(env),
            engine,
        })
    }

    /// Renders an override template without consulting the engine.
    pub fn render_override(&self, template: &OverrideRuleTemplate) -> Result<String, CompileError> {
        let model = model::override_model(template).map_err(|reason| CompileError::NotRenderable {
            kind: format!("{:?}", template.kind),
            reason,
        })?;
        let name = match template.kind {
            OverrideTemplateType::Annotations | OverrideTemplateType::Labels => "metadata.cue.j2",
            OverrideTemplateType::Resources => "resources.cue.j2",
            OverrideTemplateType::ResourcesOversell => "oversell.cue.j2",
            OverrideTemplateType::Tolerations => "tolerations.cue.j2",
            OverrideTemplateType::Affinity => "affinity.cue.j2",
        };
        self.render(name, &model)
    }

    /// Renders a validate template without consulting the engine.
    pub fn render_validate(&self, template: &ValidateRuleTemplate) -> Result<String, CompileError> {
        let not_renderable = |reason: String| CompileError::NotRenderable {
            kind: format!("{:?}", template.kind),
            reason,
        };
        match template.kind {
            ValidateTemplateType::Condition => {
                let condition = template
                    .condition
                    .as_ref()
                    .ok_or_else(|| not_renderable("condition is not set".to_string()))?;
                let model = model::condition_model(condition).map_err(not_renderable)?;
                self.render("condition.cue.j2", &model)
            }
            ValidateTemplateType::PodAvailableBadge => {
                let badge = template
                    .pod_available_badge
                    .as_ref()
                    .ok_or_else(|| not_renderable("podAvailableBadge is not set".to_string()))?;
                let model = model::badge_model(badge).map_err(not_renderable)?;
                self.render("badge.cue.j2", &model)
            }
        }
    }

    /// Renders, formats and checks an override template.
    pub fn compile_override(&self, template: &OverrideRuleTemplate) -> Result<String, CompileError> {
        let program = self.render_override(template)?;
        self.finish(&program)
    }

    /// Renders, formats and checks a validate template.
    pub fn compile_validate(&self, template: &ValidateRuleTemplate) -> Result<String, CompileError> {
        let program = self.render_validate(template)?;
        self.finish(&program)
    }

    /// Re-checks an already rendered program.
    pub fn check(&self, program: &str) -> Result<(), CompileError> {
        self.engine.validate(program).map_err(CompileError::Validate)
    }

    fn finish(&self, program: &str) -> Result<String, CompileError> {
        let formatted = self.engine.format(program).map_err(CompileError::Format)?;
        self.check(&formatted)?;
        tracing::trace!(program = %formatted, "Compiled rule");
        Ok(formatted)
    }

    fn render<S: Serialize>(&self, template: &'static str, model: &S) -> Result<String, CompileError> {
        self.env
            .get_template(template)
            .and_then(|t| t.render(model))
            .map_err(|source| CompileError::Render { template, source })
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").finish_non_exhaustive()
    }
}
