//! Handlebars prompt templates
//!
//! Every user template has exactly one slot, `{{input}}`, filled with the
//! literal user message. The system template has no slots.

use anyhow::Result;
use handlebars::Handlebars;
use serde::Serialize;

const SYSTEM_TEMPLATE: &str = include_str!("templates/system.txt");
const GENERIC_TEMPLATE: &str = include_str!("templates/generic.hbs");
const EXPLANATION_TEMPLATE: &str = include_str!("templates/explanation.hbs");
const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.hbs");
const CREATIVE_TEMPLATE: &str = include_str!("templates/creative.hbs");
const PROBLEM_SOLVING_TEMPLATE: &str = include_str!("templates/problem_solving.hbs");
const TONE_TEMPLATE: &str = include_str!("templates/tone.hbs");

/// The user templates a message can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Explanation,
    Summary,
    Creative,
    ProblemSolving,
    Tone,
    /// Passthrough used when no keyword matches
    Generic,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 6] = [
        TemplateKind::Explanation,
        TemplateKind::Summary,
        TemplateKind::Creative,
        TemplateKind::ProblemSolving,
        TemplateKind::Tone,
        TemplateKind::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Explanation => "explanation",
            TemplateKind::Summary => "summary",
            TemplateKind::Creative => "creative",
            TemplateKind::ProblemSolving => "problem_solving",
            TemplateKind::Tone => "tone",
            TemplateKind::Generic => "generic",
        }
    }

    /// Raw template text, before substitution
    pub fn source(&self) -> &'static str {
        match self {
            TemplateKind::Explanation => EXPLANATION_TEMPLATE,
            TemplateKind::Summary => SUMMARY_TEMPLATE,
            TemplateKind::Creative => CREATIVE_TEMPLATE,
            TemplateKind::ProblemSolving => PROBLEM_SOLVING_TEMPLATE,
            TemplateKind::Tone => TONE_TEMPLATE,
            TemplateKind::Generic => GENERIC_TEMPLATE,
        }
    }

    fn registered_name(&self) -> &'static str {
        match self {
            TemplateKind::Explanation => "explanation.hbs",
            TemplateKind::Summary => "summary.hbs",
            TemplateKind::Creative => "creative.hbs",
            TemplateKind::ProblemSolving => "problem_solving.hbs",
            TemplateKind::Tone => "tone.hbs",
            TemplateKind::Generic => "generic.hbs",
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Serialize)]
struct TemplateInput<'a> {
    input: &'a str,
}

/// Holds the registered handlebars templates
pub struct Templates {
    handlebars: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // User text goes in verbatim, not HTML-escaped
        handlebars.register_escape_fn(handlebars::no_escape);
        for kind in TemplateKind::ALL {
            handlebars.register_template_string(kind.registered_name(), kind.source())?;
        }

        Ok(Self { handlebars })
    }

    /// The system prompt, identical for every request
    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_TEMPLATE
    }

    /// Fill the `input` slot of a user template
    pub fn render(&self, kind: TemplateKind, input: &str) -> Result<String> {
        Ok(self
            .handlebars
            .render(kind.registered_name(), &TemplateInput { input })?)
    }
}
