//! Deterministic advisory prompt composition.
//!
//! A pure function from a typed input to the final prompt string — no
//! formatting library, no branching on content. The template instructs the
//! generator to answer in four fixed sections (Description, Cause,
//! Treatment, Prevention); whether the generator complies is not validated
//! here or anywhere downstream.

/// Everything the template needs, in full precision.
#[derive(Debug, Clone)]
pub struct PromptInput {
    /// Lookup-cased crop name; capitalized for display inside the prompt
    /// only.
    pub crop: String,
    pub disease: String,
    pub confidence: f32,
    /// Flattened knowledge documents in retrieval-ranked order.
    pub context: Vec<String>,
}

/// The advisory template. Slots are substituted verbatim.
const ADVISORY_TEMPLATE: &str = "\
You are an agricultural expert. Based on the following crop disease prediction:

Crop: {crop}
Disease: {disease}
Confidence: {confidence}

Here is relevant info from the knowledge base:
{context}

Provide a comprehensive, farmer-friendly analysis with the following sections. Format your response using markdown:

**Description**
Write a detailed explanation of the disease in 3-4 clear sentences. Explain what it is, how it appears, and its impact on crops.

**Cause**
Explain what causes this disease. Use bullet points (start lines with -) to list:
- The primary pathogen or cause
- Environmental conditions that favor the disease
- How the disease spreads

**Treatment**
Provide specific, actionable treatment recommendations. Use bullet points (start lines with -) for each treatment step:
- Chemical treatments (specific fungicides/pesticides with application rates)
- Cultural practices (pruning, spacing, etc.)
- Biological controls if applicable
- Timing and frequency of treatments

**Prevention**
List preventive measures farmers can take. Use bullet points (start lines with -):
- Pre-planting practices
- Crop management techniques
- Resistant varieties if available
- Monitoring and early detection methods

Write in a clear, professional tone that's easy for farmers to understand. Use proper spacing between sections.
";

/// Compose the final prompt.
///
/// Context documents are joined by a blank line in the order given; an
/// empty context still yields a well-formed prompt with an empty section.
pub fn compose(input: &PromptInput) -> String {
    ADVISORY_TEMPLATE
        .replace("{crop}", &capitalize(&input.crop))
        .replace("{disease}", &input.disease)
        .replace("{confidence}", &format_confidence(input.confidence))
        .replace("{context}", &input.context.join("\n\n"))
}

/// Round to 4 decimal places, as reported at the prompt and response
/// boundary. Internal consumers keep full precision.
pub fn round_confidence(confidence: f32) -> f64 {
    (confidence as f64 * 10_000.0).round() / 10_000.0
}

fn format_confidence(confidence: f32) -> String {
    round_confidence(confidence).to_string()
}

/// Uppercase the first character, leave the rest unchanged. Display only —
/// lookup keys keep their original casing.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(context: Vec<String>) -> PromptInput {
        PromptInput {
            crop: "wheat".into(),
            disease: "Brown Rust".into(),
            confidence: 0.97,
            context,
        }
    }

    #[test]
    fn test_compose_substitutes_all_slots() {
        let prompt = compose(&input(vec!["doc one".into(), "doc two".into()]));
        assert!(prompt.contains("Crop: Wheat"));
        assert!(prompt.contains("Disease: Brown Rust"));
        assert!(prompt.contains("Confidence: 0.97"));
        assert!(prompt.contains("doc one\n\ndoc two"));
        assert!(!prompt.contains('{'), "unsubstituted slot left in prompt");
    }

    #[test]
    fn test_compose_preserves_context_order() {
        let prompt = compose(&input(vec!["first".into(), "second".into(), "third".into()]));
        let first = prompt.find("first").unwrap();
        let second = prompt.find("second").unwrap();
        let third = prompt.find("third").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_compose_empty_context_is_well_formed() {
        let prompt = compose(&input(vec![]));
        assert!(prompt.contains("Here is relevant info from the knowledge base:\n\n"));
        assert!(prompt.contains("**Description**"));
        assert!(prompt.contains("**Prevention**"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let i = input(vec!["doc".into()]);
        assert_eq!(compose(&i), compose(&i));
    }

    #[test]
    fn test_confidence_rounded_to_four_decimals() {
        assert_eq!(format_confidence(0.97), "0.97");
        assert_eq!(format_confidence(0.823_149_9), "0.8231");
        assert_eq!(format_confidence(0.123_45), "0.1235");
        assert_eq!(format_confidence(1.0), "1");
        assert_eq!(round_confidence(0.97), 0.97);
    }

    #[test]
    fn test_capitalize_display_only() {
        assert_eq!(capitalize("wheat"), "Wheat");
        assert_eq!(capitalize("Wheat"), "Wheat");
        assert_eq!(capitalize("mAIZE"), "MAIZE");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_four_section_contract_present() {
        let prompt = compose(&input(vec![]));
        for section in ["**Description**", "**Cause**", "**Treatment**", "**Prevention**"] {
            assert!(prompt.contains(section), "missing section {}", section);
        }
    }
}
