//! Semantic roadmap invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::core::roadmap::Roadmap;

/// Check roadmap invariants:
/// - Non-empty, unique ids
/// - No self-dependencies
/// - Every `depends_on` id resolves within the roadmap
/// - The dependency relation is acyclic
pub fn validate_roadmap_invariants(roadmap: &Roadmap) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for node in &roadmap.nodes {
        if node.id.trim().is_empty() {
            errors.push("node with empty id".to_string());
        }
        if !seen.insert(node.id.as_str()) {
            errors.push(format!("duplicate id '{}'", node.id));
        }
    }

    for node in &roadmap.nodes {
        for dep in &node.depends_on {
            if dep == &node.id {
                errors.push(format!("{}: depends on itself", node.id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!("{}: dangling dependency '{}'", node.id, dep));
            }
        }
    }

    // Cycle detection only makes sense once edges resolve.
    if errors.is_empty()
        && let Some(cycle) = find_cycle(roadmap)
    {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search in document order; returns the first cycle found.
fn find_cycle(roadmap: &Roadmap) -> Option<Vec<String>> {
    let deps: HashMap<&str, &[String]> = roadmap
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.depends_on.as_slice()))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    for node in &roadmap.nodes {
        if let Some(cycle) = visit(node.id.as_str(), &deps, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match marks.get(id) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|s| *s == id).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        None => {}
    }

    marks.insert(id, Mark::Visiting);
    stack.push(id);
    for dep in deps.get(id).copied().unwrap_or(&[]) {
        if let Some(cycle) = visit(dep.as_str(), deps, marks, stack) {
            return Some(cycle);
        }
    }
    stack.pop();
    marks.insert(id, Mark::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::roadmap::NodeStatus;
    use crate::test_support::{roadmap, step};

    #[test]
    fn valid_roadmap_has_no_errors() {
        let map = roadmap(vec![
            step("1.1", NodeStatus::Done, &[]),
            step("1.2", NodeStatus::Pending, &["1.1"]),
            step("2.1", NodeStatus::Pending, &["1.1", "1.2"]),
        ]);
        assert!(validate_roadmap_invariants(&map).is_empty());
    }

    #[test]
    fn reports_duplicates_dangling_and_self_edges() {
        let map = roadmap(vec![
            step("1.1", NodeStatus::Pending, &["1.1"]),
            step("1.1", NodeStatus::Pending, &[]),
            step("2.1", NodeStatus::Pending, &["9.9"]),
        ]);
        let errors = validate_roadmap_invariants(&map);
        assert!(errors.iter().any(|e| e.contains("duplicate id '1.1'")));
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
        assert!(errors.iter().any(|e| e.contains("dangling dependency '9.9'")));
    }

    #[test]
    fn reports_cycles_with_path() {
        let map = roadmap(vec![
            step("1.1", NodeStatus::Pending, &["1.3"]),
            step("1.2", NodeStatus::Pending, &["1.1"]),
            step("1.3", NodeStatus::Pending, &["1.2"]),
        ]);
        let errors = validate_roadmap_invariants(&map);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0], "dependency cycle: 1.1 -> 1.3 -> 1.2 -> 1.1");
    }
}
