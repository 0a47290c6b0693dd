//! Template catalog backed by `tera`.
//!
//! Every [`TemplateKey`] has a default English text. A TOML file keyed by catalog name
//! (`welcomemsg`, `"request(fields)"`, ...) can replace any of them; the extra
//! `recommendations` entry formats surfaced course plans.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tera::{Context, Tera};
use thiserror::Error;

use adviser_core::config::CatalogConfig;
use adviser_core::{RecommendationResult, RegistryError, TemplateError, TemplateKey, TemplateRenderer};

pub const RECOMMENDATIONS_TEMPLATE: &str = "recommendations";

const DEFAULT_RECOMMENDATIONS: &str = "\
{% for plan in plans %}Option {{ loop.index }}: to get {{ plan.total_credits }} credits, you may choose the following course{% if plan.courses | length > 1 %}s{% endif %}:
{% for course in plan.courses %}  - {{ course.name }} ({{ course.credits }} credits; {{ course.meetings | join(sep=\", \") }})
{% endfor %}{% endfor %}";

fn default_text(key: &TemplateKey) -> &'static str {
    use adviser_core::SlotId;

    match key {
        TemplateKey::Welcome => {
            "Welcome! I can help you put together a course plan for next semester."
        }
        TemplateKey::Closing => "Glad to talk with you, bye!",
        TemplateKey::RequestMore => "Would you like another round of recommendations?",
        TemplateKey::FailRestart => {
            "Sorry, looks like you have an ambitious plan! Let's start over, maybe with less credits."
        }
        TemplateKey::Request(slot) => match slot {
            SlotId::TotalCredits => "How many credits would you like to earn?",
            SlotId::UserSchedules => {
                "When are you not available? For example \"monday morning\" or \"friday \
                 afternoon\". Say \"don't care\" if your schedule is open."
            }
            SlotId::Fields => {
                "Which fields interest you? For example NLP, CV, Math or Programming. Say \
                 \"don't care\" if any field is fine."
            }
            SlotId::Formats => {
                "Do you prefer lectures, projects or seminars? Say \"don't care\" if any format \
                 is fine."
            }
            SlotId::Semester => "Which semester are you planning for, winter or summer?",
        },
        TemplateKey::RequestWithError(slot) => match slot {
            SlotId::TotalCredits => {
                "The number of credits is required and must be a multiple of 3 between 3 and \
                 60. How many credits would you like to earn?"
            }
            SlotId::UserSchedules => {
                "Sorry, I did not get your schedule. Name a day and a part of the day, like \
                 \"tuesday evening\", or say \"don't care\"."
            }
            SlotId::Fields => {
                "Sorry, I do not know that field. Choose from Programming, general AI, Math, \
                 CogSci, Linguistics, NLP, CV, Speech, Software Engineering or Database, or say \
                 \"don't care\"."
            }
            SlotId::Formats => {
                "Sorry, the format must be lecture, project or seminar, or say \"don't care\"."
            }
            SlotId::Semester => "We need to know the semester. Is it winter or summer?",
        },
    }
}

#[derive(Debug, Error)]
pub enum TemplateCatalogError {
    #[error("failed to read template file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse template file: {0}")]
    Parse(String),
    #[error(transparent)]
    UnknownKey(#[from] RegistryError),
    #[error("template `{key}` does not compile: {message}")]
    Syntax { key: String, message: String },
}

#[derive(Debug)]
pub struct TemplateCatalog {
    tera: Tera,
    sources: BTreeMap<String, String>,
}

impl TemplateCatalog {
    /// The built-in English catalog. Fails only if a built-in template does not compile.
    pub fn standard() -> Result<Self, TemplateCatalogError> {
        Self::compile(default_sources())
    }

    /// Builds a catalog from exactly the given entries, without defaults.
    pub fn from_sources(
        sources: BTreeMap<String, String>,
    ) -> Result<Self, TemplateCatalogError> {
        for name in sources.keys() {
            if name != RECOMMENDATIONS_TEMPLATE {
                name.parse::<TemplateKey>()?;
            }
        }
        Self::compile(sources)
    }

    /// Defaults with the entries of a flat TOML table layered on top.
    pub fn with_overrides_toml(raw: &str) -> Result<Self, TemplateCatalogError> {
        let overrides: BTreeMap<String, String> =
            toml::from_str(raw).map_err(|error| TemplateCatalogError::Parse(error.to_string()))?;
        let mut sources = default_sources();
        for (name, text) in overrides {
            if name != RECOMMENDATIONS_TEMPLATE {
                name.parse::<TemplateKey>()?;
            }
            sources.insert(name, text);
        }
        Self::compile(sources)
    }

    pub fn load(path: &Path) -> Result<Self, TemplateCatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| TemplateCatalogError::Io { path: path.to_path_buf(), source })?;
        Self::with_overrides_toml(&raw)
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self, TemplateCatalogError> {
        match &config.templates_path {
            Some(path) => Self::load(path),
            None => Self::standard(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Dialogue keys without a template. Empty for any catalog built on the defaults.
    pub fn missing_keys(&self) -> Vec<TemplateKey> {
        TemplateKey::all()
            .into_iter()
            .filter(|key| !self.sources.contains_key(&key.catalog_key()))
            .collect()
    }

    pub fn render_recommendations(
        &self,
        result: &RecommendationResult,
    ) -> Result<String, TemplateError> {
        let mut context = Context::new();
        context.insert("plans", &result.plans);
        self.render_named(RECOMMENDATIONS_TEMPLATE, &context)
    }

    fn compile(sources: BTreeMap<String, String>) -> Result<Self, TemplateCatalogError> {
        let mut tera = Tera::default();
        for (name, text) in &sources {
            tera.add_raw_template(name, text).map_err(|error| TemplateCatalogError::Syntax {
                key: name.clone(),
                message: describe(&error),
            })?;
        }
        Ok(Self { tera, sources })
    }

    fn render_named(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        if !self.sources.contains_key(name) {
            return Err(TemplateError::Missing(name.to_string()));
        }
        self.tera
            .render(name, context)
            .map(|text| text.trim_end().to_string())
            .map_err(|error| TemplateError::Render { key: name.to_string(), message: describe(&error) })
    }
}

impl TemplateRenderer for TemplateCatalog {
    fn render(&self, key: &TemplateKey) -> Result<String, TemplateError> {
        self.render_named(&key.catalog_key(), &Context::new())
    }
}

fn default_sources() -> BTreeMap<String, String> {
    let mut sources: BTreeMap<String, String> = TemplateKey::all()
        .iter()
        .map(|key| (key.catalog_key(), default_text(key).to_string()))
        .collect();
    sources.insert(RECOMMENDATIONS_TEMPLATE.to_string(), DEFAULT_RECOMMENDATIONS.to_string());
    sources
}

fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
