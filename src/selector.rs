//! Keyword-based template selection
//!
//! A message is lowercased and checked against each route's keywords in
//! priority order. The first route with any keyword contained in the message
//! wins. Matching is plain substring containment, so "explained" counts as
//! "explain". Keyword lists are English-only.

use crate::settings::SettingsOverride;
use crate::templates::TemplateKind;
use serde::Serialize;

/// A keyword set mapped to a template and its sampling override
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Route {
    pub kind: TemplateKind,
    pub keywords: &'static [&'static str],
    pub overrides: SettingsOverride,
}

/// Routes in priority order
pub const ROUTES: [Route; 5] = [
    Route {
        kind: TemplateKind::Explanation,
        keywords: &["explain", "concept", "explain this", "explain the concept"],
        // Low temperature for clarity
        overrides: SettingsOverride::temperature(0.1),
    },
    Route {
        kind: TemplateKind::Summary,
        keywords: &["summary", "summarize", "key points"],
        overrides: SettingsOverride::temperature(0.1),
    },
    Route {
        kind: TemplateKind::Creative,
        keywords: &["story", "creative", "imaginative"],
        overrides: SettingsOverride::temperature(0.7).with_max_tokens(300),
    },
    Route {
        kind: TemplateKind::ProblemSolving,
        keywords: &["problem", "solve", "math", "how many"],
        overrides: SettingsOverride::temperature(0.0),
    },
    Route {
        kind: TemplateKind::Tone,
        keywords: &["tone", "formal", "professional", "rewrite"],
        overrides: SettingsOverride::temperature(0.3),
    },
];

/// Outcome of routing one message
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Selection {
    pub kind: TemplateKind,
    pub overrides: SettingsOverride,
    /// The keyword that triggered the route, `None` for the generic fallback
    pub keyword: Option<&'static str>,
}

impl Selection {
    fn generic() -> Self {
        Self {
            kind: TemplateKind::Generic,
            overrides: SettingsOverride::NONE,
            keyword: None,
        }
    }
}

/// Pick the template for a message. Never fails.
pub fn select(message: &str) -> Selection {
    let lowered = message.to_lowercase();

    ROUTES
        .iter()
        .find_map(|route| {
            route
                .keywords
                .iter()
                .find(|keyword| lowered.contains(*keyword))
                .map(|keyword| Selection {
                    kind: route.kind,
                    overrides: route.overrides,
                    keyword: Some(*keyword),
                })
        })
        .unwrap_or_else(Selection::generic)
}

/// Look up the route for a template kind, `None` for the generic template
pub fn route_for(kind: TemplateKind) -> Option<&'static Route> {
    ROUTES.iter().find(|route| route.kind == kind)
}
