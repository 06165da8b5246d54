use concierge_core::Mode;

/// Phrases that ask for a person or signal dissatisfaction (English, then Malay).
const ESCALATION_KEYWORDS: &[&str] = &[
    "speak to someone",
    "talk to a person",
    "human",
    "real person",
    "complaint",
    "not happy",
    "dissatisfied",
    "manager",
    "bercakap dengan orang",
    "nak jumpa orang",
];

/// Phrases that signal a reservation is being considered.
///
/// A bare "how much" is not listed: price questions stay in concierge mode and
/// are answered from the knowledge base.
const BOOKING_KEYWORDS: &[&str] = &[
    "book",
    "reserve",
    "available",
    "availability",
    "room for",
    "rates",
    "price",
    "tariff",
    "berapa harga",
    "nak tempah",
    "ada bilik",
    "kosong",
    "check in",
    "check-in",
    "stay",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Escalation wins over booking intent; no match means "leave the mode alone".
    pub fn classify(&self, text: &str) -> Option<Mode> {
        let normalized = normalize_text(text);

        if contains_any(&normalized, ESCALATION_KEYWORDS) {
            return Some(Mode::Handoff);
        }
        if contains_any(&normalized, BOOKING_KEYWORDS) {
            return Some(Mode::LeadCapture);
        }
        None
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn contains_any(normalized: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| normalized.contains(keyword))
}

#[cfg(test)]
mod tests {
    use concierge_core::Mode;

    use super::IntentClassifier;

    #[test]
    fn escalation_takes_priority_over_booking() {
        let classifier = IntentClassifier::new();
        assert_eq!(
            classifier.classify("I want to book but first let me speak to someone"),
            Some(Mode::Handoff)
        );
    }

    #[test]
    fn price_question_alone_keeps_concierge() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify("how much is a room?"), None);
    }

    #[test]
    fn whitespace_and_case_are_normalized() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify("Can I   SPEAK TO\tsomeone?"), Some(Mode::Handoff));
        assert_eq!(classifier.classify("CHECK-IN time?"), Some(Mode::LeadCapture));
    }

    #[test]
    fn handles_common_phrases_in_both_languages() {
        let classifier = IntentClassifier::new();
        let cases: &[(&str, Option<Mode>)] = &[
            ("I want to speak to a manager", Some(Mode::Handoff)),
            ("Can I talk to a person please", Some(Mode::Handoff)),
            ("Is there a real person there?", Some(Mode::Handoff)),
            ("I have a complaint about my room", Some(Mode::Handoff)),
            ("I'm not happy with the service", Some(Mode::Handoff)),
            ("Very dissatisfied with housekeeping", Some(Mode::Handoff)),
            ("Boleh saya bercakap dengan orang?", Some(Mode::Handoff)),
            ("Saya nak jumpa orang", Some(Mode::Handoff)),
            ("I'd like to book a deluxe room", Some(Mode::LeadCapture)),
            ("Can I reserve for Friday?", Some(Mode::LeadCapture)),
            ("Is anything available next weekend?", Some(Mode::LeadCapture)),
            ("What's the availability in May", Some(Mode::LeadCapture)),
            ("Do you have a room for two?", Some(Mode::LeadCapture)),
            ("What are your rates?", Some(Mode::LeadCapture)),
            ("What is the price per night", Some(Mode::LeadCapture)),
            ("Send me your tariff", Some(Mode::LeadCapture)),
            ("Berapa harga bilik?", Some(Mode::LeadCapture)),
            ("Saya nak tempah bilik", Some(Mode::LeadCapture)),
            ("Ada bilik untuk esok?", Some(Mode::LeadCapture)),
            ("Bilik kosong tak?", Some(Mode::LeadCapture)),
            ("What time is check in", Some(Mode::LeadCapture)),
            ("I'd like to stay 3 nights", Some(Mode::LeadCapture)),
            ("Where is the pool?", None),
            ("Do you serve breakfast?", None),
            ("Thank you!", None),
        ];

        for (text, expected) in cases {
            assert_eq!(classifier.classify(text), *expected, "classifying `{text}`");
        }
    }
}
