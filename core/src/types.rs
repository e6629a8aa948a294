use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::errors::ProviderFailure;

/// Highest confidence a provider may report
pub const MAX_CONFIDENCE: u8 = 100;

/// A single user query. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    id: Uuid,
    text: String,
    timestamp: DateTime<Utc>,
    session_id: String,
}

impl Query {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Which kind of adapter produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    RemoteAi,
    RemoteSearch,
}

impl ProviderKind {
    /// Tie-break rank, lower ranks first: remote_ai, remote_search, local.
    pub fn priority(&self) -> u8 {
        match self {
            ProviderKind::RemoteAi => 0,
            ProviderKind::RemoteSearch => 1,
            ProviderKind::Local => 2,
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::RemoteAi => "remote_ai",
            ProviderKind::RemoteSearch => "remote_search",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one adapter invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    provider_kind: ProviderKind,
    provider_name: String,
    title: String,
    body: String,
    confidence_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    structured_payload: Option<BTreeMap<String, Value>>,
}

impl ProviderResult {
    /// Confidence above 100 is clamped.
    pub fn new(
        provider_kind: ProviderKind,
        provider_name: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        confidence_score: u8,
    ) -> Self {
        Self {
            provider_kind,
            provider_name: provider_name.into(),
            title: title.into(),
            body: body.into(),
            confidence_score: confidence_score.min(MAX_CONFIDENCE),
            source_url: None,
            structured_payload: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_payload(mut self, payload: BTreeMap<String, Value>) -> Self {
        self.structured_payload = Some(payload);
        self
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider_kind
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn confidence_score(&self) -> u8 {
        self.confidence_score
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn structured_payload(&self) -> Option<&BTreeMap<String, Value>> {
        self.structured_payload.as_ref()
    }
}

/// Mode the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePreference {
    #[default]
    Local,
    Online,
}

impl ModePreference {
    pub fn from_online(online: bool) -> Self {
        if online {
            ModePreference::Online
        } else {
            ModePreference::Local
        }
    }
}

/// Mode actually used for a query after reconciling preference and connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveMode {
    LocalOnly,
    OnlinePreferred,
}

/// How an answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Local,
    Online,
    /// Online was requested but no remote adapter answered
    Degraded,
}

/// Final answer handed back to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedAnswer {
    pub query: Query,
    pub results: Vec<ProviderResult>,
    pub chosen_mode: AnswerMode,
    pub produced_at: DateTime<Utc>,
    /// Branch failures folded into the fallback decision, kept for diagnostics
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProviderFailure>,
}

impl AggregatedAnswer {
    pub fn best(&self) -> Option<&ProviderResult> {
        self.results.first()
    }
}

/// Assistant feature a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Nutrition,
    MedicalAdvisor,
    FoodScanner,
}

impl Feature {
    pub fn all() -> [Feature; 3] {
        [Feature::Nutrition, Feature::MedicalAdvisor, Feature::FoodScanner]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Nutrition => "nutrition",
            Feature::MedicalAdvisor => "medical_advisor",
            Feature::FoodScanner => "food_scanner",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Feature::Nutrition => "Nutrition Assistant",
            Feature::MedicalAdvisor => "Medical Advisor",
            Feature::FoodScanner => "Food Scanner",
        }
    }

    /// System prompt seeded as the permanent first turn of every session
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Feature::Nutrition => {
                "You are a nutrition assistant for rural communities in India. \
                 Recommend affordable, locally available ingredients (millets, dal, \
                 seasonal vegetables), give quantities and costs in rupees, keep the \
                 language simple, and advise consulting a healthcare provider for \
                 serious medical conditions."
            }
            Feature::MedicalAdvisor => {
                "You are a medical information assistant for rural patients. Explain \
                 conditions, simple and advanced treatment options and precautions in \
                 plain language. Your answers are educational only and never replace \
                 a consultation with a qualified doctor."
            }
            Feature::FoodScanner => {
                "You identify foods from label text or names and summarise calories, \
                 key nutrients, a health score out of 10 and practical eating advice \
                 for families on a budget."
            }
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "nutrition" => Ok(Feature::Nutrition),
            "medical_advisor" | "medical" => Ok(Feature::MedicalAdvisor),
            "food_scanner" | "food" => Ok(Feature::FoodScanner),
            other => Err(format!("unknown feature '{}'", other)),
        }
    }
}

/// Opaque credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
