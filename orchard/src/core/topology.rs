//! Branch topology: what new work stacks on.

use anyhow::Result;

use crate::error::OrchardError;

/// Parent branch for new work started from `current`.
///
/// Without stacking every branch is cut from trunk. With stacking, work started
/// on a feature branch stacks on that branch, and work started on trunk stays
/// on trunk.
pub fn resolve_parent(current: &str, trunk: &str, stacked: bool) -> String {
    if !stacked || current == trunk {
        return trunk.to_string();
    }
    current.to_string()
}

/// Repository-wide branch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTopology {
    pub trunk: String,
    pub stacked: bool,
}

impl BranchTopology {
    pub fn new(trunk: impl Into<String>, stacked: bool) -> Self {
        Self {
            trunk: trunk.into(),
            stacked,
        }
    }

    pub fn resolve_parent(&self, current: &str) -> String {
        resolve_parent(current, &self.trunk, self.stacked)
    }

    pub fn ensure_parent_tracked(
        &self,
        parent: &str,
        is_tracked: impl FnOnce(&str) -> Result<bool>,
    ) -> Result<()> {
        ensure_parent_tracked(parent, &self.trunk, is_tracked)
    }
}

/// Fail with [`OrchardError::UntrackedParent`] when a non-trunk parent is
/// unknown to the stacked-branch tool. Trunk never needs tracking.
pub fn ensure_parent_tracked(
    parent: &str,
    trunk: &str,
    is_tracked: impl FnOnce(&str) -> Result<bool>,
) -> Result<()> {
    if parent == trunk || is_tracked(parent)? {
        return Ok(());
    }
    Err(OrchardError::UntrackedParent {
        branch: parent.to_string(),
        trunk: trunk.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stacking_always_returns_trunk() {
        assert_eq!(resolve_parent("feature-a", "main", false), "main");
        assert_eq!(resolve_parent("main", "main", false), "main");
    }

    #[test]
    fn enabled_stacking_follows_current_branch() {
        assert_eq!(resolve_parent("main", "main", true), "main");
        assert_eq!(resolve_parent("feature-a", "main", true), "feature-a");
    }

    #[test]
    fn trunk_is_never_checked() {
        ensure_parent_tracked("main", "main", |_| panic!("trunk should not be queried"))
            .expect("trunk ok");
    }

    #[test]
    fn untracked_parent_is_a_precondition_failure() {
        let err = ensure_parent_tracked("feature-a", "main", |_| Ok(false)).expect_err("untracked");
        let domain = err.downcast_ref::<OrchardError>().expect("domain error");
        assert_eq!(
            domain,
            &OrchardError::UntrackedParent {
                branch: "feature-a".to_string(),
                trunk: "main".to_string(),
            }
        );
    }

    #[test]
    fn tracked_parent_passes() {
        let topology = BranchTopology::new("main", true);
        topology
            .ensure_parent_tracked("feature-a", |b| Ok(b == "feature-a"))
            .expect("tracked");
    }
}
