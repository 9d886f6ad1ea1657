use crate::catalog::{Role, RoleScenarioCatalog, Scenario};

/// Builds the system directive for a role assignment.
///
/// The model plays `counterpart`; the trainee plays `primary`. The output depends only
/// on the arguments, so equal inputs give byte-identical directives.
pub fn build_directive(
    catalog: &RoleScenarioCatalog,
    primary: Role,
    counterpart: Role,
    scenario: Scenario,
) -> String {
    let assistant_role = counterpart.name().to_uppercase();
    let partner_role = primary.name().to_uppercase();
    let scenario_context = catalog.scenario_context(scenario);
    let role_instructions = catalog.role_prompt(counterpart, scenario);
    let scenario_label = scenario.label();

    format!(
        r#"ROLE CONFIGURATION:
- YOU ARE: {assistant_role}
- CONVERSATION PARTNER IS: {partner_role}

SCENARIO: {scenario_context}

ROLE-SPECIFIC INSTRUCTIONS:
{role_instructions}

CRITICAL INSTRUCTIONS:
1. Always maintain the assigned role of {assistant_role}
2. Respond consistently within the context of the {scenario_label} scenario
3. Do not switch or question your role during the conversation
4. Engage naturally and contextually with your conversation partner

Respond directly and stay true to your assigned role as the {assistant_role}."#
    )
}

/// Replaces the role directive when a finished conversation is sent for review.
pub const ANALYSIS_DIRECTIVE: &str = r#"Analyze the conversation between the sales specialist and customer for:
- Strengths: What communication techniques worked well
- Weaknesses: Areas where communication could be improved
- Key moments: Critical turning points in the conversation
- Improvement suggestions: Specific, actionable tips for more effective communication
- Role-specific feedback: Tailored advice based on whether the user was acting as the sales specialist or customer

Respond ONLY with a JSON object of exactly this shape:
{
  "strengths": ["<string>", ...],
  "weaknesses": ["<string>", ...],
  "key_moments": ["<string>", ...],
  "improvement_suggestions": ["<string>", ...],
  "role_specific_feedback": "<string>"
}

Do NOT add any explanation, just the JSON."#;

/// Stop sequences that keep the model from writing the partner's next line.
pub fn stop_sequences(primary: Role, counterpart: Role) -> Vec<String> {
    vec![
        format!("You ({}):", primary.name()),
        format!("You ({}):", counterpart.name()),
    ]
}
