use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A fixed identity that either party of the conversation can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "sales specialist")]
    SalesSpecialist,
    #[serde(rename = "customer")]
    Customer,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::SalesSpecialist, Role::Customer];

    /// Human-readable name, also the canonical wire value.
    pub fn name(&self) -> &'static str {
        match self {
            Role::SalesSpecialist => "sales specialist",
            Role::Customer => "customer",
        }
    }

    /// Identifier used in prompt file names, e.g. `sales_specialist.negotiation.md`.
    pub fn slug(&self) -> &'static str {
        match self {
            Role::SalesSpecialist => "sales_specialist",
            Role::Customer => "customer",
        }
    }

    /// Case-insensitive match; `_`, `-` and runs of whitespace count as one space.
    pub fn parse(input: &str) -> Option<Role> {
        let normalized = input
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Role::ALL.into_iter().find(|role| role.name() == normalized)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed conversational context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    ProductPitch,
    ObjectionHandling,
    Negotiation,
    Upselling,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::ProductPitch,
        Scenario::ObjectionHandling,
        Scenario::Negotiation,
        Scenario::Upselling,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Scenario::ProductPitch => "product_pitch",
            Scenario::ObjectionHandling => "objection_handling",
            Scenario::Negotiation => "negotiation",
            Scenario::Upselling => "upselling",
        }
    }

    /// The key with underscores replaced, as used in prose ("objection handling").
    pub fn label(&self) -> String {
        self.key().replace('_', " ")
    }

    /// Case-insensitive match; spaces and `-` count as `_`.
    pub fn parse(input: &str) -> Option<Scenario> {
        let normalized = input
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase();
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.key() == normalized)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CatalogError {
    #[error("No role prompt for role '{0}' in scenario '{1}'")]
    MissingRolePrompt(Role, Scenario),
    #[error("No narrative context for scenario '{0}'")]
    MissingScenarioContext(Scenario),
    #[error("Prompt '{0}' is empty")]
    EmptyPrompt(String),
    #[error("Unrecognised prompt key: {0}")]
    UnknownPromptKey(String),
}

/// Prompt texts for every (role, scenario) pair and every scenario.
///
/// A catalog can only be obtained through a constructor that checks it is complete
/// over `Role::ALL × Scenario::ALL`, so lookups never fail.
#[derive(Debug, Clone)]
pub struct RoleScenarioCatalog {
    role_prompts: HashMap<(Role, Scenario), String>,
    scenario_contexts: HashMap<Scenario, String>,
}

impl RoleScenarioCatalog {
    pub fn new(
        role_prompts: HashMap<(Role, Scenario), String>,
        scenario_contexts: HashMap<Scenario, String>,
    ) -> Result<Self, CatalogError> {
        for scenario in Scenario::ALL {
            match scenario_contexts.get(&scenario) {
                None => return Err(CatalogError::MissingScenarioContext(scenario)),
                Some(text) if text.trim().is_empty() => {
                    return Err(CatalogError::EmptyPrompt(format!("scenario.{scenario}")));
                }
                Some(_) => {}
            }
            for role in Role::ALL {
                match role_prompts.get(&(role, scenario)) {
                    None => return Err(CatalogError::MissingRolePrompt(role, scenario)),
                    Some(text) if text.trim().is_empty() => {
                        return Err(CatalogError::EmptyPrompt(format!(
                            "{}.{scenario}",
                            role.slug()
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            role_prompts,
            scenario_contexts,
        })
    }

    /// Builds a catalog from prompt files keyed `<role_slug>.<scenario>` and
    /// `scenario.<scenario>`, as returned by `prompt_loader::load_prompts`.
    pub fn from_prompts(prompts: HashMap<String, String>) -> Result<Self, CatalogError> {
        let mut role_prompts = HashMap::new();
        let mut scenario_contexts = HashMap::new();

        for (key, text) in prompts {
            let Some((prefix, scenario_key)) = key.split_once('.') else {
                return Err(CatalogError::UnknownPromptKey(key));
            };
            let Some(scenario) = Scenario::parse(scenario_key) else {
                return Err(CatalogError::UnknownPromptKey(key));
            };
            let text = text.trim().to_string();

            if prefix == "scenario" {
                scenario_contexts.insert(scenario, text);
            } else if let Some(role) = Role::ALL.into_iter().find(|r| r.slug() == prefix) {
                role_prompts.insert((role, scenario), text);
            } else {
                return Err(CatalogError::UnknownPromptKey(key));
            }
        }

        Self::new(role_prompts, scenario_contexts)
    }

    /// The prompt texts the trainer ships with, checked like any other prompt set.
    pub fn builtin() -> Result<Self, CatalogError> {
        let role_prompts = HashMap::from([
            ((Role::SalesSpecialist, Scenario::ProductPitch), "You are a sales SPECIALIST pitching a software solution. Confidently explain product features, demonstrate value, and engage the customer with clear, compelling communication."),
            ((Role::SalesSpecialist, Scenario::ObjectionHandling), "You are a sales SPECIALIST responding to customer concerns. Listen carefully, address objections directly, and guide the conversation towards a positive resolution."),
            ((Role::SalesSpecialist, Scenario::Negotiation), "You are a sales SPECIALIST negotiating terms. Be strategic, find win-win solutions, and demonstrate the value of your offering."),
            ((Role::SalesSpecialist, Scenario::Upselling), "You are a sales SPECIALIST suggesting premium options. Highlight additional benefits, show how upgrades solve specific customer needs."),
            ((Role::Customer, Scenario::ProductPitch), "You are a CUSTOMER evaluating a software solution. Ask probing questions, express genuine interest or skepticism, and seek clear value proposition."),
            ((Role::Customer, Scenario::ObjectionHandling), "You are a CUSTOMER raising specific concerns about the product. Be critical but open to hearing solutions."),
            ((Role::Customer, Scenario::Negotiation), "You are a CUSTOMER negotiating purchase terms. Focus on your needs, budget constraints, and seek the best possible deal."),
            ((Role::Customer, Scenario::Upselling), "You are a CUSTOMER considering product upgrades. Be discerning, ask about specific benefits, and only consider upgrades that provide clear value."),
        ])
        .into_iter()
        .map(|(key, text)| (key, text.to_string()))
        .collect();

        let scenario_contexts = HashMap::from([
            (Scenario::ProductPitch, "The conversation is a product introduction where the sales specialist is presenting a new software solution to a potential customer. The customer is evaluating several options and needs to be convinced of this product's unique value."),
            (Scenario::ObjectionHandling, "The conversation follows an initial pitch where the customer has expressed several reservations about moving forward. The sales specialist needs to address these concerns professionally to keep the opportunity alive."),
            (Scenario::Negotiation, "The conversation is at the final stage where both parties are discussing pricing, terms, and implementation details. This is a critical moment to find an agreement that satisfies both sides."),
            (Scenario::Upselling, "The conversation is with an existing customer who already uses the basic version of a product. The sales specialist is suggesting premium features or complementary products that could provide additional value."),
        ])
        .into_iter()
        .map(|(key, text)| (key, text.to_string()))
        .collect();

        Self::new(role_prompts, scenario_contexts)
    }

    pub fn role_prompt(&self, role: Role, scenario: Scenario) -> &str {
        // Completeness is checked at construction.
        self.role_prompts
            .get(&(role, scenario))
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn scenario_context(&self, scenario: Scenario) -> &str {
        self.scenario_contexts
            .get(&scenario)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn is_valid_role(&self, input: &str) -> bool {
        Role::parse(input).is_some()
    }

    pub fn is_valid_scenario(&self, input: &str) -> bool {
        Scenario::parse(input).is_some()
    }

    pub fn roles(&self) -> &'static [Role] {
        &Role::ALL
    }

    pub fn scenarios(&self) -> &'static [Scenario] {
        &Scenario::ALL
    }

    /// "The other role", defined only while the catalog has exactly two roles.
    pub fn default_counterpart(&self, role: Role) -> Option<Role> {
        if Role::ALL.len() != 2 {
            return None;
        }
        Role::ALL.into_iter().find(|other| *other != role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin_as_prompts() -> HashMap<String, String> {
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        let mut prompts = HashMap::new();
        for scenario in Scenario::ALL {
            prompts.insert(
                format!("scenario.{scenario}"),
                catalog.scenario_context(scenario).to_string(),
            );
            for role in Role::ALL {
                prompts.insert(
                    format!("{}.{scenario}", role.slug()),
                    catalog.role_prompt(role, scenario).to_string(),
                );
            }
        }
        prompts
    }

    #[test]
    fn builtin_catalog_is_complete() {
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        for scenario in Scenario::ALL {
            assert!(!catalog.scenario_context(scenario).is_empty());
            for role in Role::ALL {
                assert!(
                    !catalog.role_prompt(role, scenario).is_empty(),
                    "missing prompt for {role} / {scenario}"
                );
            }
        }
    }

    #[test]
    fn builtin_catalog_goes_through_construction_checks() {
        assert!(RoleScenarioCatalog::builtin().is_ok());

        // The same texts with one entry dropped are refused by the same checks.
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        let mut contexts = catalog.scenario_contexts.clone();
        contexts.remove(&Scenario::ProductPitch);
        assert_eq!(
            RoleScenarioCatalog::new(catalog.role_prompts.clone(), contexts).unwrap_err(),
            CatalogError::MissingScenarioContext(Scenario::ProductPitch)
        );
    }

    #[test]
    fn construction_rejects_missing_role_prompt() {
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        let mut role_prompts = catalog.role_prompts.clone();
        role_prompts.remove(&(Role::Customer, Scenario::Upselling));

        let err = RoleScenarioCatalog::new(role_prompts, catalog.scenario_contexts.clone())
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::MissingRolePrompt(Role::Customer, Scenario::Upselling)
        );
    }

    #[test]
    fn construction_rejects_blank_scenario_context() {
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        let mut contexts = catalog.scenario_contexts.clone();
        contexts.insert(Scenario::Negotiation, "   ".to_string());

        let err = RoleScenarioCatalog::new(catalog.role_prompts.clone(), contexts).unwrap_err();
        assert_eq!(err, CatalogError::EmptyPrompt("scenario.negotiation".into()));
    }

    #[test]
    fn from_prompts_round_trips_builtin_texts() {
        let catalog = RoleScenarioCatalog::from_prompts(builtin_as_prompts()).unwrap();
        let builtin = RoleScenarioCatalog::builtin().unwrap();
        assert_eq!(
            catalog.role_prompt(Role::SalesSpecialist, Scenario::Negotiation),
            builtin.role_prompt(Role::SalesSpecialist, Scenario::Negotiation)
        );
    }

    #[test]
    fn from_prompts_rejects_unknown_keys() {
        let mut prompts = builtin_as_prompts();
        prompts.insert("manager.negotiation".to_string(), "text".to_string());
        assert_eq!(
            RoleScenarioCatalog::from_prompts(prompts).unwrap_err(),
            CatalogError::UnknownPromptKey("manager.negotiation".into())
        );
    }

    #[test]
    fn from_prompts_rejects_incomplete_directory() {
        let mut prompts = builtin_as_prompts();
        prompts.remove("scenario.upselling");
        assert_eq!(
            RoleScenarioCatalog::from_prompts(prompts).unwrap_err(),
            CatalogError::MissingScenarioContext(Scenario::Upselling)
        );
    }

    #[test]
    fn role_parsing_is_case_and_separator_insensitive() {
        assert_eq!(Role::parse("Sales Specialist"), Some(Role::SalesSpecialist));
        assert_eq!(Role::parse("sales_specialist"), Some(Role::SalesSpecialist));
        assert_eq!(Role::parse("  SALES   specialist "), Some(Role::SalesSpecialist));
        assert_eq!(Role::parse("CUSTOMER"), Some(Role::Customer));
        assert_eq!(Role::parse("manager"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn scenario_parsing_is_case_and_separator_insensitive() {
        assert_eq!(Scenario::parse("product_pitch"), Some(Scenario::ProductPitch));
        assert_eq!(Scenario::parse("Product Pitch"), Some(Scenario::ProductPitch));
        assert_eq!(
            Scenario::parse("objection-handling"),
            Some(Scenario::ObjectionHandling)
        );
        assert_eq!(Scenario::parse("not_a_real_scenario"), None);
    }

    #[test]
    fn default_counterpart_flips_between_two_roles() {
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        assert_eq!(
            catalog.default_counterpart(Role::SalesSpecialist),
            Some(Role::Customer)
        );
        assert_eq!(
            catalog.default_counterpart(Role::Customer),
            Some(Role::SalesSpecialist)
        );
    }

    #[test]
    fn serde_uses_display_names() {
        assert_eq!(
            serde_json::to_string(&Role::SalesSpecialist).unwrap(),
            "\"sales specialist\""
        );
        assert_eq!(
            serde_json::to_string(&Scenario::ObjectionHandling).unwrap(),
            "\"objection_handling\""
        );
    }
}
