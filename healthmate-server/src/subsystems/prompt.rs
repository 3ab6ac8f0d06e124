//! Prompt composition for chat turns, plus the greeting shown to the user.

use chrono::{DateTime, Utc};
use healthmate_core::{ChatTurn, PrescriptionRecord};

const FIRST_TIME_INSTRUCTION: &str = "You are a doctor with 20 years of experience. A first-time \
patient has come to you and is describing the symptoms they are facing. Understand the health \
issue from the symptoms the patient describes, then prescribe suitable medication and give \
lifestyle advice.";

const RETURNING_INSTRUCTION: &str = "You are a doctor with 20 years of experience. A returning \
patient has come back to you and is describing the symptoms they are facing. Understand the \
health issue from the symptoms the patient describes, then prescribe suitable medication and \
give lifestyle advice. This is the patient's last prescription: ";

/// System instruction heading every chat-turn request.
pub fn system_instruction(is_new_user: bool, prior: Option<&PrescriptionRecord>) -> String {
    if is_new_user {
        return FIRST_TIME_INSTRUCTION.to_string();
    }
    let context = prior.map(previous_prescription).unwrap_or_default();
    format!("{}{}", RETURNING_INSTRUCTION, context)
}

/// Render a stored record as prompt context.
pub fn previous_prescription(record: &PrescriptionRecord) -> String {
    let medicines = record
        .medicines_prescribed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Previous Prescription: \nHealth Issue: {}\nSymptoms: {}\nMedicines Prescribed: {}\nLifestyle Advice: {}",
        record.health_issue,
        record.symptoms.join(", "),
        medicines,
        record.lifestyle_advice.as_paragraph(),
    )
}

/// Instruction first, then history oldest-first, then the new utterance.
pub fn compose_messages(instruction: String, history: Vec<ChatTurn>, utterance: &str) -> Vec<ChatTurn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatTurn::system(instruction));
    messages.extend(history);
    messages.push(ChatTurn::user(utterance));
    messages
}

/// Greeting for the chat window. Returning users are told how many hours
/// passed since their last message.
pub fn generate_initial_response(
    username: &str,
    is_new_user: bool,
    last_visit: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    match last_visit {
        Some(last) if !is_new_user => {
            let hours = (now - last).num_milliseconds() as f64 / 3_600_000.0;
            format!(
                "Welcome back, {}! You last visited {:.2} hours ago. How can I assist you with your health today?",
                username, hours
            )
        }
        _ => format!("Hi {}, how are you feeling today?", username),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use healthmate_core::{LifestyleAdvice, MedicineEntry, Role};

    fn prior_record() -> PrescriptionRecord {
        PrescriptionRecord {
            username: "alice".into(),
            health_issue: "Seasonal allergies".into(),
            symptoms: vec!["sneezing".into(), "itchy eyes".into()],
            medicines_prescribed: vec![
                MedicineEntry::from("Cetirizine 10mg"),
                MedicineEntry::Structured(serde_json::json!({"name": "Saline spray"})),
            ],
            lifestyle_advice: LifestyleAdvice::Text("Keep windows closed.".into()),
            updated_at: None,
        }
    }

    #[test]
    fn test_new_user_instruction_has_no_prior_content() {
        let instruction = system_instruction(true, Some(&prior_record()));
        assert!(instruction.contains("first-time patient"));
        assert!(!instruction.contains("Previous Prescription"));
        assert!(!instruction.contains("Seasonal allergies"));
    }

    #[test]
    fn test_returning_instruction_embeds_prior_record() {
        let instruction = system_instruction(false, Some(&prior_record()));
        assert!(instruction.contains("returning patient"));
        assert!(instruction.contains("Health Issue: Seasonal allergies"));
        assert!(instruction.contains("Symptoms: sneezing, itchy eyes"));
        assert!(instruction.contains(r#"Medicines Prescribed: Cetirizine 10mg, {"name":"Saline spray"}"#));
        assert!(instruction.contains("Lifestyle Advice: Keep windows closed."));
    }

    #[test]
    fn test_returning_instruction_without_record_ends_with_empty_context() {
        let instruction = system_instruction(false, None);
        assert_eq!(instruction, RETURNING_INSTRUCTION);
    }

    #[test]
    fn test_compose_orders_instruction_history_utterance() {
        let history = vec![ChatTurn::user("I feel dizzy"), ChatTurn::system("Since when?")];
        let messages = compose_messages("instruct".into(), history, "Two days");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatTurn::system("instruct"));
        assert_eq!(messages[1].content, "I feel dizzy");
        assert_eq!(messages[2].role, Role::System);
        assert_eq!(messages[3], ChatTurn::user("Two days"));
    }

    #[test]
    fn test_greeting_reports_two_and_a_half_hours() {
        let now = Utc::now();
        let last = now - Duration::minutes(150);
        let greeting = generate_initial_response("bob", false, Some(last), now);
        assert!(greeting.contains("2.50"), "{}", greeting);
        assert!(greeting.starts_with("Welcome back, bob!"));
    }

    #[test]
    fn test_greeting_for_new_user_uses_name() {
        let now = Utc::now();
        assert_eq!(
            generate_initial_response("carol", true, Some(now), now),
            "Hi carol, how are you feeling today?"
        );
        // Returning without any recorded message falls back to the first-visit greeting
        assert_eq!(
            generate_initial_response("carol", false, None, now),
            "Hi carol, how are you feeling today?"
        );
    }
}
