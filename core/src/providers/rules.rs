//! Built-in rule tables used by the local provider, one per feature.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::types::Feature;

/// How a rule decides whether it applies to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    /// The whole normalized message equals one of the words
    Exact(Vec<String>),
    /// The normalized message contains one of the phrases
    ContainsAny(Vec<String>),
    /// Matches everything; used for the default rule
    Always,
}

impl RuleMatcher {
    pub fn exact(words: &[&str]) -> Self {
        RuleMatcher::Exact(words.iter().map(|w| w.to_string()).collect())
    }

    pub fn contains_any(phrases: &[&str]) -> Self {
        RuleMatcher::ContainsAny(phrases.iter().map(|p| p.to_string()).collect())
    }

    /// `normalized` must come from [`normalize`].
    pub fn matches(&self, normalized: &str) -> bool {
        match self {
            RuleMatcher::Exact(words) => words.iter().any(|w| w == normalized),
            RuleMatcher::ContainsAny(phrases) => phrases.iter().any(|p| normalized.contains(p.as_str())),
            RuleMatcher::Always => true,
        }
    }
}

/// One `{predicate, response}` entry
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub matcher: RuleMatcher,
    pub response: String,
    pub payload: Option<BTreeMap<String, Value>>,
}

impl Rule {
    pub fn new(name: impl Into<String>, matcher: RuleMatcher, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher,
            response: response.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        if let Value::Object(map) = payload {
            self.payload = Some(map.into_iter().collect());
        }
        self
    }
}

/// Lowercases, collapses whitespace and trims trailing punctuation.
pub fn normalize(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim()
        .to_string()
}

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "namaste",
    "namaskar",
    "hola",
    "good morning",
    "good afternoon",
    "good evening",
];

const THANKS: &[&str] = &["thank you", "thanks", "thanku", "shukriya", "dhanyavad"];

const GOODBYES: &[&str] = &["bye", "goodbye", "good bye", "see you", "alvida", "take care"];

fn conversational_rules(feature: Feature) -> Vec<Rule> {
    vec![
        Rule::new(
            "greeting",
            RuleMatcher::exact(GREETINGS),
            format!(
                "Hello! I'm your {} for rural health. Ask me a question and I'll do my best to help.",
                feature.display_name()
            ),
        ),
        Rule::new(
            "how_are_you",
            RuleMatcher::contains_any(&["how are you", "how r u", "kaise ho"]),
            "I'm doing well, thank you for asking! What can I help you with today?",
        ),
        Rule::new(
            "thanks",
            RuleMatcher::contains_any(THANKS),
            "You're very welcome! I'm always here if you have more questions. Take care.",
        ),
        Rule::new(
            "goodbye",
            RuleMatcher::exact(GOODBYES),
            "Goodbye! Eat balanced meals, drink clean water and see a doctor for serious health issues.",
        ),
    ]
}

/// Ordered rule table for a feature. The last rule always matches.
pub fn default_rules(feature: Feature) -> Vec<Rule> {
    let mut rules = conversational_rules(feature);
    match feature {
        Feature::Nutrition => rules.extend(nutrition_rules()),
        Feature::MedicalAdvisor => rules.extend(medical_rules()),
        Feature::FoodScanner => rules.extend(food_rules()),
    }
    rules
}

fn nutrition_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "help",
            RuleMatcher::contains_any(&["help", "what can you do", "capabilities"]),
            "I can help with budget meal planning, pregnancy and child nutrition, \
             diabetes-friendly meals, anemia prevention, kitchen gardens and \
             traditional remedies. Ask me a specific question.",
        ),
        Rule::new(
            "meal_plan",
            RuleMatcher::contains_any(&["meal plan", "weekly", "daily menu"]),
            "7-day plan for a family of four (about Rs 150-200/day): ragi porridge with \
             jaggery for breakfast, bajra roti with moong dal and a seasonal vegetable for \
             lunch, brown rice with masoor dal and curd for dinner. Rotate millets, pulses \
             and greens through the week; soak grains overnight and pressure cook in batches.",
        ),
        Rule::new(
            "pregnancy",
            RuleMatcher::contains_any(&["pregnancy", "pregnant", "maternal"]),
            "During pregnancy focus on folate (leafy greens, masoor dal), iron (sesame, \
             jaggery, drumstick leaves), calcium (ragi, curd) and 70-80 g protein a day. \
             Eat small frequent meals, drink clean water and attend monthly check-ups at \
             the nearest PHC.",
        ),
        Rule::new(
            "child",
            RuleMatcher::contains_any(&["child", "baby", "infant"]),
            "From 6 months add mashed dal-rice, ragi porridge and mashed banana alongside \
             breastfeeding. Toddlers need eggs or paneer, seasonal fruit and a handful of \
             peanuts daily. Track weight monthly at the anganwadi.",
        ),
        Rule::new(
            "diabetes",
            RuleMatcher::contains_any(&["diabetes", "sugar level", "blood sugar"]),
            "For diabetes prefer millets (jowar, bajra, ragi) over polished rice, fill half \
             the plate with vegetables, include dal at every meal and avoid sweets and \
             sugary drinks. Walk 30 minutes daily and keep taking prescribed medicines.",
        ),
        Rule::new(
            "anemia",
            RuleMatcher::contains_any(&["anemia", "anaemia", "iron deficiency"]),
            "To prevent anemia eat green leafy vegetables, jaggery, sesame and sprouted \
             pulses with a source of vitamin C such as amla or lemon. Avoid tea right after \
             meals.",
        ),
        Rule::new(
            "kitchen_garden",
            RuleMatcher::contains_any(&["kitchen garden", "grow", "farming"]),
            "A 10x10 ft kitchen garden with spinach, amaranth, tomato, drumstick and \
             papaya can supply vegetables year round. Use kitchen waste compost and water \
             early in the morning.",
        ),
        Rule::new(
            "traditional",
            RuleMatcher::contains_any(&["traditional", "remedy", "ayurveda"]),
            "Useful traditional foods: turmeric milk for immunity, ginger tea for nausea, \
             fenugreek seeds for blood sugar support and buttermilk for digestion. These \
             support, not replace, medical treatment.",
        ),
        Rule::new(
            "default",
            RuleMatcher::Always,
            "I can help with meal plans, pregnancy and child nutrition, managing health \
             conditions with local foods and kitchen gardens. Switch to online mode for a \
             personalised answer.",
        ),
    ]
}

fn medical_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "diabetes",
            RuleMatcher::contains_any(&["diabetes", "blood sugar"]),
            "Diabetes type 2 (moderate): monitor blood sugar regularly, eat low-carb \
             high-fibre meals, exercise 30 minutes daily and manage weight. Advanced care \
             includes insulin therapy. Seek emergency care for very high or very low sugar.",
        )
        .with_payload(json!({"condition": "Diabetes Type 2", "severity": "moderate"})),
        Rule::new(
            "hypertension",
            RuleMatcher::contains_any(&["hypertension", "blood pressure", "bp"]),
            "High blood pressure: reduce salt, avoid tobacco and alcohol, walk daily and \
             check BP monthly. Take prescribed medicines every day even when you feel well.",
        )
        .with_payload(json!({"condition": "Hypertension", "severity": "moderate"})),
        Rule::new(
            "fever",
            RuleMatcher::contains_any(&["fever", "temperature"]),
            "Fever: rest, drink plenty of fluids and use paracetamol as directed. See a \
             doctor if fever lasts more than 3 days, is above 103F, or comes with rash, \
             breathing difficulty or confusion.",
        )
        .with_payload(json!({"condition": "Fever", "severity": "mild"})),
        Rule::new(
            "cold",
            RuleMatcher::contains_any(&["cold", "cough", "sore throat"]),
            "Common cold: steam inhalation, warm salt-water gargles, ginger-honey tea and \
             rest. Consult a doctor if cough lasts over two weeks or there is blood in sputum.",
        )
        .with_payload(json!({"condition": "Common Cold", "severity": "mild"})),
        Rule::new(
            "diarrhea",
            RuleMatcher::contains_any(&["diarrhea", "diarrhoea", "loose motion", "dehydration"]),
            "Diarrhea: give ORS after every loose stool, continue feeding and add zinc for \
             children. Go to a health centre if there is blood in stool or signs of severe \
             dehydration.",
        )
        .with_payload(json!({"condition": "Diarrhea", "severity": "moderate"})),
        Rule::new(
            "default",
            RuleMatcher::Always,
            "I couldn't find that condition in the offline library. Try a simpler term such \
             as diabetes, fever or blood pressure, switch to online mode, or consult your \
             nearest health centre.",
        ),
    ]
}

fn food_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "rice",
            RuleMatcher::contains_any(&["rice", "chawal"]),
            "Rice (100 g cooked): about 130 kcal, mostly carbohydrate. Brown or parboiled \
             rice keeps more fibre; pair with dal for complete protein.",
        )
        .with_payload(json!({"food": "Rice", "calories": 130, "health_score": 7})),
        Rule::new(
            "dal",
            RuleMatcher::contains_any(&["dal", "lentil"]),
            "Dal (100 g cooked): about 116 kcal with 9 g protein and plenty of fibre and \
             folate. An affordable protein source for the whole family.",
        )
        .with_payload(json!({"food": "Dal", "calories": 116, "health_score": 9})),
        Rule::new(
            "banana",
            RuleMatcher::contains_any(&["banana", "kela"]),
            "Banana (1 medium): about 105 kcal, rich in potassium and vitamin B6. A good \
             energy snack; diabetics should limit ripe bananas.",
        )
        .with_payload(json!({"food": "Banana", "calories": 105, "health_score": 8})),
        Rule::new(
            "spinach",
            RuleMatcher::contains_any(&["spinach", "palak"]),
            "Spinach (100 g): about 23 kcal, high in iron, folate and vitamin A. Cook \
             lightly and add lemon to improve iron absorption.",
        )
        .with_payload(json!({"food": "Spinach", "calories": 23, "health_score": 9})),
        Rule::new(
            "carrot",
            RuleMatcher::contains_any(&["carrot", "gajar"]),
            "Carrot (100 g): about 41 kcal, a good source of vitamin A for eye health and \
             fibre for digestion.",
        )
        .with_payload(json!({"food": "Carrot", "calories": 41, "health_score": 8})),
        Rule::new(
            "default",
            RuleMatcher::Always,
            "This food is not in the offline database yet. Try its common name, or switch \
             to online mode for a detailed analysis.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello!!  "), "hello");
        assert_eq!(normalize("Good   Morning?"), "good morning");
        assert_eq!(normalize("What is DAL"), "what is dal");
    }

    #[test]
    fn test_every_table_ends_with_default() {
        for feature in Feature::all() {
            let rules = default_rules(feature);
            let last = rules.last().unwrap();
            assert_eq!(last.name, "default");
            assert_eq!(last.matcher, RuleMatcher::Always);
        }
    }

    #[test]
    fn test_exact_does_not_match_substring() {
        let matcher = RuleMatcher::exact(GREETINGS);
        assert!(matcher.matches("hi"));
        assert!(!matcher.matches("hi, my child has fever"));
    }

    #[test]
    fn test_payload_is_attached() {
        let rules = default_rules(Feature::FoodScanner);
        let banana = rules.iter().find(|r| r.name == "banana").unwrap();
        let payload = banana.payload.as_ref().unwrap();
        assert_eq!(payload.get("health_score"), Some(&json!(8)));
    }
}
