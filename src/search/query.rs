//! Declarative query construction.
//!
//! [`QueryBuilder`] turns a [`QueryRuleSet`] into the boolean query string
//! the search endpoints accept. The translation is pure and deterministic:
//! the same rule set always produces the same string.

use std::collections::HashMap;

use serde::Deserialize;

/// Keyword lists attached to one field rule.
///
/// The `and`/`or` distinction is carried from the configuration format but
/// deliberately flattened on output: every keyword, whichever list it came
/// from, becomes one OR-joined clause within its group.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RuleLogic {
    /// Keywords from the `and` list.
    #[serde(default)]
    pub and: Vec<String>,
    /// Keywords from the `or` list.
    #[serde(default)]
    pub or: Vec<String>,
    /// Standalone keywords.
    #[serde(default)]
    pub alone: Vec<String>,
}

impl RuleLogic {
    /// Standalone keywords only.
    #[must_use]
    pub fn alone(keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            alone: keywords.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_empty() && self.alone.is_empty()
    }

    fn keywords(&self) -> impl Iterator<Item = &str> {
        self.and
            .iter()
            .chain(&self.or)
            .chain(&self.alone)
            .map(String::as_str)
    }
}

/// One inclusive date range.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    /// Range start.
    pub from: String,
    /// Range end.
    pub to: String,
}

/// Date constraint; only the first range is used.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DateLogic {
    /// Candidate ranges.
    #[serde(default)]
    pub ranges: Vec<DateRange>,
}

/// One rule: either a field with keyword logic, or a date constraint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FieldRule {
    /// Field name the rule applies to.
    #[serde(default)]
    pub field: Option<String>,
    /// Keyword lists for the field.
    #[serde(default)]
    pub logic: RuleLogic,
    /// Date constraint, for date rules.
    #[serde(default)]
    pub date: Option<DateLogic>,
}

impl FieldRule {
    /// Field rule with standalone keywords.
    #[must_use]
    pub fn with_alone(
        field: impl Into<String>,
        keywords: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            logic: RuleLogic::alone(keywords),
            date: None,
        }
    }
}

/// The full declarative rule set.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct QueryRuleSet {
    /// Positive rules. The last rule for a field wins.
    #[serde(default)]
    pub to_be: Vec<FieldRule>,
    /// Field groups: OR within a group, AND across groups.
    #[serde(default)]
    pub groups: Vec<Vec<String>>,
    /// Negative rules; only their `alone` keywords are emitted.
    #[serde(default)]
    pub not_to_be: Vec<FieldRule>,
}

/// Clause material for one field, resolved from the rule list.
enum FieldClauses {
    /// A fully formatted clause (date ranges).
    Precomputed(String),
    /// Keyword lists still to be expanded.
    Keywords(RuleLogic),
}

/// Builds a boolean query string from a [`QueryRuleSet`].
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    ruleset: QueryRuleSet,
}

impl QueryBuilder {
    /// Wraps a rule set for building.
    #[must_use]
    pub fn new(ruleset: QueryRuleSet) -> Self {
        Self { ruleset }
    }

    /// Assembles the final query string.
    ///
    /// Groups with a single clause are emitted bare; groups with several
    /// are parenthesized and OR-joined; empty groups are omitted entirely.
    /// NOT clauses follow the groups, and everything is AND-joined. An
    /// empty rule set yields an empty string.
    #[must_use]
    pub fn build(&self) -> String {
        let mut rules: HashMap<&str, FieldClauses> = HashMap::new();
        for rule in &self.ruleset.to_be {
            if let Some(field) = &rule.field {
                rules.insert(field, FieldClauses::Keywords(rule.logic.clone()));
            } else if let Some(date) = &rule.date
                && let Some(range) = date.ranges.first()
            {
                rules.insert(
                    "date",
                    FieldClauses::Precomputed(format!("date:[{} TO {}]", range.from, range.to)),
                );
            }
        }

        let mut parts: Vec<String> = Vec::new();

        for group in &self.ruleset.groups {
            let mut clauses: Vec<String> = Vec::new();
            for field in group {
                match rules.get(field.as_str()) {
                    Some(FieldClauses::Precomputed(clause)) => clauses.push(clause.clone()),
                    Some(FieldClauses::Keywords(logic)) if !logic.is_empty() => {
                        clauses.extend(logic.keywords().map(|kw| format!("{field}:\"{kw}\"")));
                    }
                    _ => {}
                }
            }

            match clauses.len() {
                0 => {}
                1 => parts.push(clauses.remove(0)),
                _ => parts.push(format!("({})", clauses.join(" OR "))),
            }
        }

        for rule in &self.ruleset.not_to_be {
            if let Some(field) = &rule.field {
                parts.extend(
                    rule.logic
                        .alone
                        .iter()
                        .map(|kw| format!("NOT {field}:\"{kw}\"")),
                );
            }
        }

        parts.join(" AND ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn creator_doe() -> QueryRuleSet {
        QueryRuleSet {
            to_be: vec![FieldRule::with_alone("creator", ["Doe"])],
            groups: vec![vec!["creator".to_string()]],
            not_to_be: Vec::new(),
        }
    }

    #[test]
    fn test_single_clause_is_unparenthesized() {
        assert_eq!(QueryBuilder::new(creator_doe()).build(), "creator:\"Doe\"");
    }

    #[test]
    fn test_build_is_deterministic_and_idempotent() {
        let builder = QueryBuilder::new(creator_doe());
        assert_eq!(builder.build(), builder.build());
    }

    #[test]
    fn test_two_field_group_is_or_joined_and_parenthesized() {
        let ruleset = QueryRuleSet {
            to_be: vec![
                FieldRule::with_alone("field1", ["a"]),
                FieldRule::with_alone("field2", ["b"]),
            ],
            groups: vec![vec!["field1".to_string(), "field2".to_string()]],
            not_to_be: Vec::new(),
        };
        assert_eq!(
            QueryBuilder::new(ruleset).build(),
            "(field1:\"a\" OR field2:\"b\")"
        );
    }

    #[test]
    fn test_not_rule_appends_negated_clause() {
        let mut ruleset = creator_doe();
        ruleset.not_to_be = vec![FieldRule::with_alone("lang", ["x"])];
        assert_eq!(
            QueryBuilder::new(ruleset).build(),
            "creator:\"Doe\" AND NOT lang:\"x\""
        );
    }

    #[test]
    fn test_not_rule_ignores_non_alone_keywords() {
        let mut ruleset = creator_doe();
        ruleset.not_to_be = vec![FieldRule {
            field: Some("lang".to_string()),
            logic: RuleLogic {
                or: vec!["ignored".to_string()],
                ..RuleLogic::default()
            },
            date: None,
        }];
        assert_eq!(QueryBuilder::new(ruleset).build(), "creator:\"Doe\"");
    }

    #[test]
    fn test_and_or_alone_are_flattened_into_one_group() {
        let ruleset = QueryRuleSet {
            to_be: vec![FieldRule {
                field: Some("subject".to_string()),
                logic: RuleLogic {
                    and: vec!["mars".to_string()],
                    or: vec!["venus".to_string()],
                    alone: vec!["pluto".to_string()],
                },
                date: None,
            }],
            groups: vec![vec!["subject".to_string()]],
            not_to_be: Vec::new(),
        };
        assert_eq!(
            QueryBuilder::new(ruleset).build(),
            "(subject:\"mars\" OR subject:\"venus\" OR subject:\"pluto\")"
        );
    }

    #[test]
    fn test_date_rule_becomes_range_clause() {
        let ruleset = QueryRuleSet {
            to_be: vec![FieldRule {
                field: None,
                logic: RuleLogic::default(),
                date: Some(DateLogic {
                    ranges: vec![DateRange {
                        from: "2020-01-01".to_string(),
                        to: "2020-12-31".to_string(),
                    }],
                }),
            }],
            groups: vec![vec!["date".to_string()]],
            not_to_be: Vec::new(),
        };
        assert_eq!(
            QueryBuilder::new(ruleset).build(),
            "date:[2020-01-01 TO 2020-12-31]"
        );
    }

    #[test]
    fn test_last_rule_for_a_field_wins() {
        let ruleset = QueryRuleSet {
            to_be: vec![
                FieldRule::with_alone("creator", ["First"]),
                FieldRule::with_alone("creator", ["Second"]),
            ],
            groups: vec![vec!["creator".to_string()]],
            not_to_be: Vec::new(),
        };
        assert_eq!(QueryBuilder::new(ruleset).build(), "creator:\"Second\"");
    }

    #[test]
    fn test_group_without_rules_is_omitted() {
        let mut ruleset = creator_doe();
        ruleset.groups.push(vec!["publisher".to_string()]);
        let built = QueryBuilder::new(ruleset).build();
        assert_eq!(built, "creator:\"Doe\"");
        assert!(!built.contains("()"), "no empty parentheses: {built}");
    }

    #[test]
    fn test_empty_ruleset_builds_empty_string() {
        assert_eq!(QueryBuilder::new(QueryRuleSet::default()).build(), "");
    }

    #[test]
    fn test_ruleset_deserializes_from_json() {
        let ruleset: QueryRuleSet = serde_json::from_value(serde_json::json!({
            "to_be": [
                {"field": "creator", "logic": {"alone": ["Doe"]}},
                {"date": {"ranges": [{"from": "1990", "to": "1999"}]}}
            ],
            "groups": [["creator"], ["date"]],
            "not_to_be": [{"field": "lang", "logic": {"alone": ["x"]}}]
        }))
        .unwrap();
        assert_eq!(
            QueryBuilder::new(ruleset).build(),
            "creator:\"Doe\" AND date:[1990 TO 1999] AND NOT lang:\"x\""
        );
    }
}
