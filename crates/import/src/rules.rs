use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tally_core::{AccountId, CategoryId, Money, RuleId, TransactionRecord};
use thiserror::Error;

use crate::logic::{self, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Contains,
    Equals,
    #[serde(alias = "startsWith")]
    StartsWith,
    #[serde(alias = "endsWith")]
    EndsWith,
    Regex,
    #[serde(alias = "amountRange")]
    AmountRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Description,
    #[serde(alias = "recipientApplicant")]
    RecipientApplicant,
    Amount,
    Iban,
}

/// One atomic test. `id` is only meaningful inside the owning rule's
/// `condition_logic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: u32,
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub field: ConditionField,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub min_amount: Option<Money>,
    #[serde(default)]
    pub max_amount: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: Option<String>,
    pub category_id: CategoryId,
    /// Empty means every account.
    #[serde(default)]
    pub account_scope: BTreeSet<AccountId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AutomationRule {
    pub fn applies_to(&self, account: AccountId) -> bool {
        self.enabled && (self.account_scope.is_empty() || self.account_scope.contains(&account))
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule {rule} ('{name}') disabled: invalid regex in condition {condition}: {source}")]
    RegexCompile {
        rule: RuleId,
        name: String,
        condition: u32,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug)]
enum Matcher {
    /// Needle is pre-lowercased for case-insensitive conditions.
    Text(String),
    Pattern(Regex),
    Range {
        min: Option<Money>,
        max: Option<Money>,
    },
    /// A text condition without a value never matches.
    Never,
}

#[derive(Debug)]
struct CompiledCondition {
    id: u32,
    condition_type: ConditionType,
    field: ConditionField,
    case_sensitive: bool,
    matcher: Matcher,
}

impl CompiledCondition {
    fn compile(rule: &AutomationRule, condition: &Condition) -> Result<Self, RuleError> {
        let matcher = match (condition.condition_type, condition.value.as_deref()) {
            (ConditionType::AmountRange, _) => Matcher::Range {
                min: condition.min_amount,
                max: condition.max_amount,
            },
            (_, None) => Matcher::Never,
            (ConditionType::Regex, Some(pattern)) => {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(!condition.case_sensitive)
                    .build()
                    .map_err(|source| RuleError::RegexCompile {
                        rule: rule.id,
                        name: rule.name.clone(),
                        condition: condition.id,
                        source,
                    })?;
                Matcher::Pattern(re)
            }
            (_, Some(value)) if condition.case_sensitive => Matcher::Text(value.to_string()),
            (_, Some(value)) => Matcher::Text(value.to_lowercase()),
        };

        Ok(Self {
            id: condition.id,
            condition_type: condition.condition_type,
            field: condition.field,
            case_sensitive: condition.case_sensitive,
            matcher,
        })
    }

    fn evaluate(&self, tx: &TransactionRecord) -> bool {
        match &self.matcher {
            Matcher::Never => false,
            Matcher::Range { min, max } => {
                min.map_or(true, |m| tx.amount >= m) && max.map_or(true, |m| tx.amount <= m)
            }
            Matcher::Pattern(re) => re.is_match(&field_text(tx, self.field)),
            Matcher::Text(needle) => {
                let raw = field_text(tx, self.field);
                let text = if self.case_sensitive { raw } else { raw.to_lowercase() };
                match self.condition_type {
                    ConditionType::Contains => text.contains(needle.as_str()),
                    ConditionType::Equals => text == *needle,
                    ConditionType::StartsWith => text.starts_with(needle.as_str()),
                    ConditionType::EndsWith => text.ends_with(needle.as_str()),
                    ConditionType::Regex | ConditionType::AmountRange => false,
                }
            }
        }
    }
}

fn field_text(tx: &TransactionRecord, field: ConditionField) -> String {
    match field {
        ConditionField::Description => tx.description.clone(),
        ConditionField::RecipientApplicant => tx.recipient_applicant.clone().unwrap_or_default(),
        ConditionField::Amount => tx.amount.to_string(),
        ConditionField::Iban => tx.iban.clone().unwrap_or_default(),
    }
}

#[derive(Debug)]
enum Combinator {
    /// No (usable) logic string: any true condition matches.
    AnyOf,
    Expression(Expr),
}

/// A rule with its regexes compiled and its logic string parsed once.
#[derive(Debug)]
struct CompiledRule {
    rule: AutomationRule,
    conditions: Vec<CompiledCondition>,
    combinator: Combinator,
}

impl CompiledRule {
    fn matches(&self, tx: &TransactionRecord) -> bool {
        match &self.combinator {
            Combinator::AnyOf => self.conditions.iter().any(|c| c.evaluate(tx)),
            Combinator::Expression(expr) => {
                let results: HashMap<u32, bool> = self
                    .conditions
                    .iter()
                    .map(|c| (c.id, c.evaluate(tx)))
                    .collect();
                expr.evaluate(&results)
            }
        }
    }
}

/// Prioritized, immutable rule set for one run.
#[derive(Debug, Default)]
pub struct CategoryRuleEngine {
    rules: Vec<CompiledRule>,
    warnings: Vec<String>,
}

impl CategoryRuleEngine {
    /// `rules` must be in creation order; it breaks priority ties.
    pub fn new(rules: Vec<AutomationRule>) -> Self {
        let mut warnings = Vec::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            let conditions: Result<Vec<_>, _> = rule
                .conditions
                .iter()
                .map(|c| CompiledCondition::compile(&rule, c))
                .collect();
            let conditions = match conditions {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("{e}");
                    warnings.push(e.to_string());
                    continue;
                }
            };

            let combinator = match rule.condition_logic.as_deref().map(str::trim) {
                None | Some("") => Combinator::AnyOf,
                Some(text) => {
                    let declared: Vec<u32> = rule.conditions.iter().map(|c| c.id).collect();
                    match logic::parse_for(text, &declared) {
                        Ok(expr) => Combinator::Expression(expr),
                        Err(e) => {
                            let msg = format!(
                                "Rule {} ('{}'): condition logic '{}' is invalid ({e}), \
                                 matching any condition instead",
                                rule.id, rule.name, text
                            );
                            tracing::warn!("{msg}");
                            warnings.push(msg);
                            Combinator::AnyOf
                        }
                    }
                }
            };

            compiled.push(CompiledRule {
                rule,
                conditions,
                combinator,
            });
        }

        // Highest priority first; the sort is stable so ties keep creation order.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Self {
            rules: compiled,
            warnings,
        }
    }

    /// Problems found while compiling: disabled rules and logic fallbacks.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find_matching_rule(&self, tx: &TransactionRecord) -> Option<&AutomationRule> {
        self.rules
            .iter()
            .filter(|cr| cr.rule.applies_to(tx.account_id))
            .find(|cr| cr.matches(tx))
            .map(|cr| &cr.rule)
    }

    pub fn categorize(&self, tx: &TransactionRecord) -> Option<CategoryId> {
        self.find_matching_rule(tx).map(|r| r.category_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_tx(recipient: &str, desc: &str, amount: &str) -> TransactionRecord {
        TransactionRecord {
            account_id: AccountId(1),
            date_value: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            amount: amount.parse().unwrap(),
            description: desc.to_string(),
            iban: Some("DE02120300000000202051".to_string()),
            bic: None,
            recipient_applicant: Some(recipient.to_string()),
            account_number: None,
            fingerprint: String::new(),
        }
    }

    fn text(
        id: u32,
        condition_type: ConditionType,
        field: ConditionField,
        value: &str,
    ) -> Condition {
        Condition {
            id,
            condition_type,
            field,
            value: Some(value.to_string()),
            case_sensitive: false,
            min_amount: None,
            max_amount: None,
        }
    }

    fn range(id: u32, min: Option<&str>, max: Option<&str>) -> Condition {
        Condition {
            id,
            condition_type: ConditionType::AmountRange,
            field: ConditionField::Amount,
            value: None,
            case_sensitive: false,
            min_amount: min.map(|m| m.parse().unwrap()),
            max_amount: max.map(|m| m.parse().unwrap()),
        }
    }

    fn make_rule(
        id: i64,
        priority: i32,
        category: i64,
        conditions: Vec<Condition>,
        logic: Option<&str>,
    ) -> AutomationRule {
        AutomationRule {
            id: RuleId(id),
            name: format!("rule {id}"),
            conditions,
            condition_logic: logic.map(str::to_string),
            category_id: CategoryId(category),
            account_scope: BTreeSet::new(),
            priority,
            enabled: true,
        }
    }

    fn contains_recipient(value: &str) -> Condition {
        text(1, ConditionType::Contains, ConditionField::RecipientApplicant, value)
    }

    #[test]
    fn contains_match_case_insensitive() {
        let rule = make_rule(1, 0, 10, vec![contains_recipient("rewe")], None);
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert_eq!(
            engine.categorize(&make_tx("REWE Markt GmbH", "", "-5")),
            Some(CategoryId(10))
        );
        assert_eq!(engine.categorize(&make_tx("ALDI", "", "-5")), None);
    }

    #[test]
    fn case_sensitive_condition() {
        let mut cond = contains_recipient("rewe");
        cond.case_sensitive = true;
        let engine = CategoryRuleEngine::new(vec![make_rule(1, 0, 10, vec![cond], None)]);
        assert_eq!(engine.categorize(&make_tx("REWE Markt", "", "-5")), None);
        assert_eq!(engine.categorize(&make_tx("rewe markt", "", "-5")), Some(CategoryId(10)));
    }

    #[test]
    fn equals_starts_with_ends_with() {
        let equals = make_rule(
            1,
            0,
            1,
            vec![text(1, ConditionType::Equals, ConditionField::Description, "miete")],
            None,
        );
        let starts = make_rule(
            2,
            0,
            2,
            vec![text(1, ConditionType::StartsWith, ConditionField::Description, "gehalt")],
            None,
        );
        let ends = make_rule(
            3,
            0,
            3,
            vec![text(1, ConditionType::EndsWith, ConditionField::Description, "abo")],
            None,
        );
        let engine = CategoryRuleEngine::new(vec![equals, starts, ends]);
        assert_eq!(engine.categorize(&make_tx("", "MIETE", "-1")), Some(CategoryId(1)));
        assert_eq!(engine.categorize(&make_tx("", "Miete Januar", "-1")), None);
        assert_eq!(engine.categorize(&make_tx("", "Gehalt 01/2024", "1")), Some(CategoryId(2)));
        assert_eq!(engine.categorize(&make_tx("", "Streaming ABO", "-1")), Some(CategoryId(3)));
    }

    #[test]
    fn regex_searches_case_insensitively() {
        let rule = make_rule(
            1,
            0,
            7,
            vec![text(1, ConditionType::Regex, ConditionField::Description, r"amzn|amazon")],
            None,
        );
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert_eq!(
            engine.categorize(&make_tx("", "Payment AMAZON EU", "-9")),
            Some(CategoryId(7))
        );
        assert_eq!(engine.categorize(&make_tx("", "WHOLE FOODS", "-9")), None);
    }

    #[test]
    fn case_sensitive_regex_keeps_case() {
        let mut cond = text(1, ConditionType::Regex, ConditionField::Description, r"^AMZN\b");
        cond.case_sensitive = true;
        let engine = CategoryRuleEngine::new(vec![make_rule(1, 0, 7, vec![cond], None)]);
        assert!(engine.warnings().is_empty());
        assert_eq!(engine.categorize(&make_tx("", "AMZN Mktp DE", "-9")), Some(CategoryId(7)));
        assert_eq!(engine.categorize(&make_tx("", "amzn mktp de", "-9")), None);
        assert_eq!(engine.categorize(&make_tx("", "Payment AMZN", "-9")), None);
    }

    #[test]
    fn iban_and_amount_fields() {
        let by_iban = make_rule(
            1,
            0,
            1,
            vec![text(1, ConditionType::StartsWith, ConditionField::Iban, "de02")],
            None,
        );
        let engine = CategoryRuleEngine::new(vec![by_iban]);
        assert_eq!(engine.categorize(&make_tx("", "", "-1")), Some(CategoryId(1)));

        let by_amount_text = make_rule(
            2,
            0,
            2,
            vec![text(1, ConditionType::Equals, ConditionField::Amount, "-9.99")],
            None,
        );
        let engine = CategoryRuleEngine::new(vec![by_amount_text]);
        assert_eq!(engine.categorize(&make_tx("", "", "-9.99")), Some(CategoryId(2)));
    }

    #[test]
    fn amount_range_bounds_are_inclusive_and_optional() {
        let bounded = make_rule(1, 0, 1, vec![range(1, Some("-50"), Some("0"))], None);
        let engine = CategoryRuleEngine::new(vec![bounded]);
        assert!(engine.categorize(&make_tx("", "", "-50")).is_some());
        assert!(engine.categorize(&make_tx("", "", "0")).is_some());
        assert!(engine.categorize(&make_tx("", "", "-50.01")).is_none());
        assert!(engine.categorize(&make_tx("", "", "0.01")).is_none());

        let open_min = make_rule(1, 0, 1, vec![range(1, None, Some("100"))], None);
        let open_min = CategoryRuleEngine::new(vec![open_min]);
        assert!(open_min.categorize(&make_tx("", "", "-100000")).is_some());
        let open_max = make_rule(1, 0, 1, vec![range(1, Some("100"), None)], None);
        let open_max = CategoryRuleEngine::new(vec![open_max]);
        assert!(open_max.categorize(&make_tx("", "", "100000")).is_some());
    }

    #[test]
    fn conditions_without_logic_are_ored() {
        let rule = make_rule(
            1,
            0,
            1,
            vec![contains_recipient("rewe"), range(2, Some("1000"), None)],
            None,
        );
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert!(engine.categorize(&make_tx("REWE", "", "-5")).is_some());
        assert!(engine.categorize(&make_tx("ALDI", "", "2000")).is_some());
        assert!(engine.categorize(&make_tx("ALDI", "", "-5")).is_none());
    }

    #[test]
    fn condition_logic_is_applied() {
        let rule = make_rule(
            1,
            0,
            1,
            vec![contains_recipient("rewe"), range(2, Some("-50"), Some("0"))],
            Some("1 UND 2"),
        );
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert!(engine.warnings().is_empty());
        assert!(engine.categorize(&make_tx("REWE", "", "-20")).is_some());
        assert!(engine.categorize(&make_tx("REWE", "", "-80")).is_none());
    }

    #[test]
    fn malformed_logic_falls_back_to_or() {
        let rule = make_rule(
            1,
            0,
            1,
            vec![contains_recipient("rewe"), range(2, Some("-50"), Some("0"))],
            Some("1 AND ("),
        );
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.warnings().len(), 1);
        // Only condition 1 holds; OR-fallback still matches.
        assert!(engine.categorize(&make_tx("REWE", "", "-80")).is_some());
    }

    #[test]
    fn logic_referencing_unknown_condition_falls_back_to_or() {
        let rule = make_rule(1, 0, 1, vec![contains_recipient("rewe")], Some("1 AND 5"));
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert_eq!(engine.warnings().len(), 1);
        assert!(engine.categorize(&make_tx("REWE", "", "-1")).is_some());
    }

    #[test]
    fn invalid_regex_disables_only_that_rule() {
        let broken = make_rule(
            1,
            100,
            1,
            vec![text(1, ConditionType::Regex, ConditionField::Description, "(unclosed")],
            None,
        );
        let fine = make_rule(2, 1, 2, vec![contains_recipient("rewe")], None);
        let engine = CategoryRuleEngine::new(vec![broken, fine]);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.warnings().len(), 1);
        assert!(engine.warnings()[0].contains("Rule 1"));
        assert_eq!(
            engine.categorize(&make_tx("REWE", "(unclosed", "-1")),
            Some(CategoryId(2))
        );
    }

    #[test]
    fn priority_ordering_highest_wins() {
        let low = make_rule(
            1,
            1,
            100,
            vec![contains_recipient("rewe"), range(2, None, Some("0"))],
            Some("1 AND 2"),
        );
        let high = make_rule(
            2,
            10,
            200,
            vec![contains_recipient("rewe"), range(2, None, Some("0"))],
            Some("1 AND 2"),
        );
        let engine = CategoryRuleEngine::new(vec![low, high]);
        assert_eq!(engine.categorize(&make_tx("REWE", "", "-1")), Some(CategoryId(200)));
    }

    #[test]
    fn higher_priority_combined_rule_beats_simple_rule() {
        let r1 = make_rule(1, 5, 1, vec![contains_recipient("REWE")], None);
        let r2 = make_rule(
            2,
            8,
            2,
            vec![contains_recipient("REWE"), range(2, Some("-50"), Some("0"))],
            Some("1 AND 2"),
        );
        let engine = CategoryRuleEngine::new(vec![r1, r2]);
        assert_eq!(
            engine.categorize(&make_tx("REWE Markt", "", "-20")),
            Some(CategoryId(2))
        );
        // Outside R2's range R1 still applies.
        assert_eq!(
            engine.categorize(&make_tx("REWE Markt", "", "-120")),
            Some(CategoryId(1))
        );
    }

    #[test]
    fn priority_ties_keep_creation_order() {
        let older = make_rule(1, 3, 1, vec![contains_recipient("rewe")], None);
        let newer = make_rule(2, 3, 2, vec![contains_recipient("rewe")], None);
        let engine = CategoryRuleEngine::new(vec![older, newer]);
        assert_eq!(engine.categorize(&make_tx("REWE", "", "-1")), Some(CategoryId(1)));
    }

    #[test]
    fn disabled_and_out_of_scope_rules_are_skipped() {
        let mut disabled = make_rule(1, 10, 1, vec![contains_recipient("rewe")], None);
        disabled.enabled = false;
        let mut other_account = make_rule(2, 9, 2, vec![contains_recipient("rewe")], None);
        other_account.account_scope.insert(AccountId(99));
        let mut this_account = make_rule(3, 8, 3, vec![contains_recipient("rewe")], None);
        this_account.account_scope.insert(AccountId(1));
        let engine = CategoryRuleEngine::new(vec![disabled, other_account, this_account]);
        assert_eq!(engine.categorize(&make_tx("REWE", "", "-1")), Some(CategoryId(3)));
    }

    #[test]
    fn condition_without_value_never_matches() {
        let mut cond = contains_recipient("x");
        cond.value = None;
        let engine = CategoryRuleEngine::new(vec![make_rule(1, 0, 1, vec![cond], None)]);
        assert!(engine.categorize(&make_tx("anything", "", "-1")).is_none());
    }

    #[test]
    fn rule_without_conditions_never_matches() {
        let engine = CategoryRuleEngine::new(vec![make_rule(1, 0, 1, Vec::new(), None)]);
        assert!(engine.categorize(&make_tx("REWE", "", "-1")).is_none());
    }
}
