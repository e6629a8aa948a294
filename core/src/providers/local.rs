use async_trait::async_trait;
use tracing::debug;

use super::rules::{self, normalize, Rule};
use super::{ProviderAdapter, QueryContext};
use crate::errors::{FailureReason, ProviderFailure};
use crate::types::{Feature, ProviderKind, ProviderResult, Query};

/// Deterministic, offline rule-based answers
#[derive(Debug, Clone)]
pub struct LocalRuleProvider {
    name: String,
    title: String,
    rules: Vec<Rule>,
    confidence: u8,
}

impl LocalRuleProvider {
    pub fn new(name: impl Into<String>, title: impl Into<String>, rules: Vec<Rule>, confidence: u8) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            rules,
            confidence,
        }
    }

    /// Provider backed by the built-in table for a feature
    pub fn for_feature(feature: Feature, confidence: u8) -> Self {
        Self::new(
            format!("local-{}", feature.as_str()),
            format!("{} (offline)", feature.display_name()),
            rules::default_rules(feature),
            confidence,
        )
    }

    /// First rule matching the text, in table order
    pub fn find_rule(&self, text: &str) -> Option<&Rule> {
        let normalized = normalize(text);
        self.rules.iter().find(|rule| rule.matcher.matches(&normalized))
    }

    /// Synchronous evaluation; the adapter never suspends.
    pub fn evaluate(&self, query: &Query) -> Result<ProviderResult, ProviderFailure> {
        let rule = self.find_rule(query.text()).ok_or_else(|| {
            ProviderFailure::new(
                self.name.clone(),
                FailureReason::NoMatch,
                "no rule matched and the table has no default",
            )
        })?;

        debug!(provider = %self.name, rule = %rule.name, "Local rule matched");

        let mut result = ProviderResult::new(
            ProviderKind::Local,
            self.name.clone(),
            self.title.clone(),
            rule.response.clone(),
            self.confidence,
        );
        if let Some(payload) = &rule.payload {
            result = result.with_payload(payload.clone());
        }
        Ok(result)
    }
}

#[async_trait]
impl ProviderAdapter for LocalRuleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn answer(
        &self,
        query: &Query,
        _context: &QueryContext,
    ) -> Result<Vec<ProviderResult>, ProviderFailure> {
        self.evaluate(query).map(|result| vec![result])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RuleMatcher;

    fn query(text: &str) -> Query {
        Query::new("session-1", text)
    }

    #[test]
    fn test_greeting_rule() {
        let provider = LocalRuleProvider::for_feature(Feature::Nutrition, 40);
        let rule = provider.find_rule("Namaste!").unwrap();
        assert_eq!(rule.name, "greeting");
    }

    #[test]
    fn test_first_match_wins() {
        // "thank you for the meal plan" matches both thanks and meal_plan;
        // thanks sits earlier in the table.
        let provider = LocalRuleProvider::for_feature(Feature::Nutrition, 40);
        let rule = provider.find_rule("thank you for the meal plan").unwrap();
        assert_eq!(rule.name, "thanks");
    }

    #[test]
    fn test_topic_and_default() {
        let provider = LocalRuleProvider::for_feature(Feature::Nutrition, 40);
        assert_eq!(provider.find_rule("what should I eat when pregnant").unwrap().name, "pregnancy");
        assert_eq!(provider.find_rule("tell me about quantum physics").unwrap().name, "default");
    }

    #[test]
    fn test_result_uses_fixed_confidence() {
        let provider = LocalRuleProvider::for_feature(Feature::MedicalAdvisor, 37);
        let result = provider.evaluate(&query("I have a fever")).unwrap();
        assert_eq!(result.provider_kind(), ProviderKind::Local);
        assert_eq!(result.confidence_score(), 37);
        assert!(result.body().contains("paracetamol"));
        assert!(result.structured_payload().is_some());
    }

    #[test]
    fn test_food_payload() {
        let provider = LocalRuleProvider::for_feature(Feature::FoodScanner, 40);
        let result = provider.evaluate(&query("Palak paneer")).unwrap();
        let payload = result.structured_payload().unwrap();
        assert_eq!(payload["food"], serde_json::json!("Spinach"));
    }

    #[test]
    fn test_table_without_default_reports_no_match() {
        let provider = LocalRuleProvider::new(
            "local-test",
            "Test",
            vec![Rule::new("only", RuleMatcher::exact(&["ping"]), "pong")],
            40,
        );
        let failure = provider.evaluate(&query("hello")).unwrap_err();
        assert_eq!(failure.reason, FailureReason::NoMatch);
    }

    #[tokio::test]
    async fn test_answer_through_trait() {
        let provider = LocalRuleProvider::for_feature(Feature::Nutrition, 40);
        let context = QueryContext::new(Feature::Nutrition, Vec::new());
        let results = provider.answer(&query("hi"), &context).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].body().starts_with("Hello!"));
    }
}
