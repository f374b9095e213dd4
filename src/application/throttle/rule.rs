//! Rate limit rules and their linked-limit graph.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::id::RuleId;
use crate::error::RateLimitError;

/// A parent rule debited whenever the owning rule admits a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedLimit {
    pub parent: RuleId,
    #[serde(default = "default_link_weight")]
    pub weight: u32,
}

const fn default_link_weight() -> u32 {
    1
}

impl LinkedLimit {
    pub fn new(parent: impl Into<RuleId>, weight: u32) -> Self {
        Self {
            parent: parent.into(),
            weight,
        }
    }
}

/// Weighted budget for one logical endpoint or shared pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub id: RuleId,
    pub capacity: u32,
    /// Window length; parsed from `window_ms` in configuration.
    #[serde(with = "millis", rename = "window_ms")]
    pub window: Duration,
    #[serde(default)]
    pub linked: Vec<LinkedLimit>,
}

impl RateLimitRule {
    pub fn new(id: impl Into<RuleId>, capacity: u32, window: Duration) -> Self {
        Self {
            id: id.into(),
            capacity,
            window,
            linked: Vec::new(),
        }
    }

    #[must_use]
    pub fn linked_to(mut self, parent: impl Into<RuleId>, weight: u32) -> Self {
        self.linked.push(LinkedLimit::new(parent, weight));
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Check that every parent exists and the graph has no cycle.
pub(crate) fn validate(rules: &HashMap<RuleId, RateLimitRule>) -> Result<(), RateLimitError> {
    for rule in rules.values() {
        for link in &rule.linked {
            if !rules.contains_key(&link.parent) {
                return Err(RateLimitError::UnknownParent {
                    rule: rule.id.clone(),
                    parent: link.parent.clone(),
                });
            }
        }
    }

    let mut done = HashSet::new();
    for id in rules.keys() {
        let mut on_path = HashSet::new();
        visit(id, rules, &mut on_path, &mut done)?;
    }
    Ok(())
}

fn visit<'a>(
    id: &'a RuleId,
    rules: &'a HashMap<RuleId, RateLimitRule>,
    on_path: &mut HashSet<&'a RuleId>,
    done: &mut HashSet<&'a RuleId>,
) -> Result<(), RateLimitError> {
    if done.contains(id) {
        return Ok(());
    }
    if !on_path.insert(id) {
        return Err(RateLimitError::Cycle(id.clone()));
    }
    if let Some(rule) = rules.get(id) {
        for link in &rule.linked {
            visit(&link.parent, rules, on_path, done)?;
        }
    }
    on_path.remove(id);
    done.insert(id);
    Ok(())
}

/// Every rule reachable from `root` with the weight it is debited per call.
///
/// The root carries the request weight. Each reachable parent is debited once,
/// with the largest link weight among the edges that reach it.
pub(crate) fn closure(
    root: &RuleId,
    rules: &HashMap<RuleId, RateLimitRule>,
) -> Vec<(RuleId, Option<u32>)> {
    let mut weights: HashMap<RuleId, u32> = HashMap::new();
    let mut stack = vec![root.clone()];
    let mut seen = HashSet::from([root.clone()]);
    while let Some(id) = stack.pop() {
        let Some(rule) = rules.get(&id) else {
            continue;
        };
        for link in &rule.linked {
            let entry = weights.entry(link.parent.clone()).or_insert(0);
            *entry = (*entry).max(link.weight);
            if seen.insert(link.parent.clone()) {
                stack.push(link.parent.clone());
            }
        }
    }

    let mut out = vec![(root.clone(), None)];
    let mut parents: Vec<_> = weights.into_iter().collect();
    parents.sort_by(|a, b| a.0.cmp(&b.0));
    out.extend(parents.into_iter().map(|(id, weight)| (id, Some(weight))));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rules: Vec<RateLimitRule>) -> HashMap<RuleId, RateLimitRule> {
        rules.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let rules = table(vec![
            RateLimitRule::new("A", 1, Duration::from_secs(1)).linked_to("missing", 1)
        ]);
        assert!(matches!(
            validate(&rules),
            Err(RateLimitError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let rules = table(vec![
            RateLimitRule::new("A", 1, Duration::from_secs(1)).linked_to("B", 1),
            RateLimitRule::new("B", 1, Duration::from_secs(1)).linked_to("A", 1),
        ]);
        assert!(matches!(validate(&rules), Err(RateLimitError::Cycle(_))));
    }

    #[test]
    fn test_diamond_debits_shared_parent_once_with_max_weight() {
        let rules = table(vec![
            RateLimitRule::new("A", 10, Duration::from_secs(1))
                .linked_to("B", 1)
                .linked_to("C", 1),
            RateLimitRule::new("B", 10, Duration::from_secs(1)).linked_to("P", 2),
            RateLimitRule::new("C", 10, Duration::from_secs(1)).linked_to("P", 5),
            RateLimitRule::new("P", 10, Duration::from_secs(1)),
        ]);
        validate(&rules).unwrap();
        let closure = closure(&RuleId::from("A"), &rules);
        assert_eq!(closure.len(), 4);
        assert_eq!(closure[0], (RuleId::from("A"), None));
        let parent = closure.iter().find(|(id, _)| id.as_str() == "P").unwrap();
        assert_eq!(parent.1, Some(5));
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let rule: RateLimitRule = toml::from_str(
            r#"
            id = "orders"
            capacity = 10
            window_ms = 1000
            linked = [{ parent = "global", weight = 2 }]
            "#,
        )
        .unwrap();
        assert_eq!(rule.window, Duration::from_secs(1));
        assert_eq!(rule.linked[0], LinkedLimit::new("global", 2));
    }
}
