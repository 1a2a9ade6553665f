//! Inheritance planning over a capability snapshot

use super::capabilities::CapabilitySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Every transitive subtype of every type that has at least one child
pub fn transitive_subtypes(parent_of: &BTreeMap<String, String>) -> BTreeMap<String, BTreeSet<String>> {
    let mut children_of: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (child, parent) in parent_of {
        children_of.entry(parent.as_str()).or_default().insert(child.as_str());
    }

    let mut result = BTreeMap::new();
    for &parent in children_of.keys() {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = vec![parent];
        while let Some(current) = stack.pop() {
            for &child in children_of.get(current).into_iter().flatten() {
                // cycles in malformed schemas terminate here
                if child != parent && seen.insert(child.to_string()) {
                    stack.push(child);
                }
            }
        }
        result.insert(parent.to_string(), seen);
    }
    result
}

/// Capabilities a subtype redeclares although a supertype already declares them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeclarationPlan {
    /// `(subtype, attribute)`
    pub owns: Vec<(String, String)>,
    /// `(subtype, relation:role)`
    pub plays: Vec<(String, String)>,
}

impl RedeclarationPlan {
    pub fn build(snapshot: &CapabilitySnapshot) -> Self {
        let subtypes = transitive_subtypes(&snapshot.parent_of);
        let mut owns = BTreeSet::new();
        let mut plays = BTreeSet::new();

        for (supertype, descendants) in &subtypes {
            for sub in descendants {
                for attr in Self::shared(snapshot.owns(supertype), snapshot.owns(sub)) {
                    owns.insert((sub.clone(), attr));
                }
                for role in Self::shared(snapshot.plays(supertype), snapshot.plays(sub)) {
                    plays.insert((sub.clone(), role));
                }
            }
        }

        Self {
            owns: owns.into_iter().collect(),
            plays: plays.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owns.is_empty() && self.plays.is_empty()
    }

    fn shared(a: Option<&BTreeSet<String>>, b: Option<&BTreeSet<String>>) -> Vec<String> {
        match (a, b) {
            (Some(a), Some(b)) => a.intersection(b).cloned().collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transitive_subtypes() {
        let snapshot = CapabilitySnapshot::extract(
            "entity a; entity b sub a; entity c sub b; entity d sub a;",
        )
        .unwrap();
        let subtypes = transitive_subtypes(&snapshot.parent_of);
        assert_eq!(
            subtypes.get("a").unwrap().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["b", "c", "d"]
        );
        assert_eq!(subtypes.get("b").unwrap().len(), 1);
        assert!(subtypes.get("c").is_none());
    }

    #[test]
    fn test_redeclaration_plan() {
        let snapshot = CapabilitySnapshot::extract(
            r#"
            entity evidence, owns title, plays citation:source;
            entity paper sub evidence, owns title, owns doi;
            entity preprint sub paper, plays citation:source;
            "#,
        )
        .unwrap();
        let plan = RedeclarationPlan::build(&snapshot);
        assert_eq!(plan.owns, vec![("paper".to_string(), "title".to_string())]);
        assert_eq!(
            plan.plays,
            vec![("preprint".to_string(), "citation:source".to_string())]
        );
    }

    #[test]
    fn test_cyclic_parents_terminate() {
        let mut parent_of = BTreeMap::new();
        parent_of.insert("a".to_string(), "b".to_string());
        parent_of.insert("b".to_string(), "a".to_string());
        let subtypes = transitive_subtypes(&parent_of);
        assert_eq!(subtypes.get("a").unwrap().len(), 1);
    }
}
