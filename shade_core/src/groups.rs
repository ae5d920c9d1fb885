//! Visual groups: which shades are stopped and calibrated together.
//!
//! With no groups configured every shade belongs to one implicit cohort. As
//! soon as one group exists, ungrouped shades become singleton cohorts.

use crate::error::ShadeError;
use shade_traits::ShadeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

pub const IMPLICIT_GROUP_NAME: &str = "All shades";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualGroup {
    pub id: String,
    pub name: String,
    pub members: Vec<ShadeId>,
}

/// The set of shades an operation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cohort {
    Group(String),
    Standalone(ShadeId),
    All,
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cohort::Group(id) => write!(f, "group:{id}"),
            Cohort::Standalone(shade) => write!(f, "shade:{shade}"),
            Cohort::All => f.write_str("all"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisualGroupRegistry {
    groups: BTreeMap<String, VisualGroup>,
    membership: HashMap<ShadeId, String>,
}

impl VisualGroupRegistry {
    /// Build a registry, rejecting empty group ids and shades listed twice.
    pub fn new(groups: impl IntoIterator<Item = VisualGroup>) -> Result<Self, ShadeError> {
        let mut out = Self::default();
        for mut group in groups {
            group.id = group.id.trim().to_string();
            if group.id.is_empty() {
                return Err(ShadeError::UnknownGroup(String::new()));
            }
            if group.name.trim().is_empty() {
                group.name.clone_from(&group.id);
            }
            let mut seen = BTreeSet::new();
            group.members.retain(|m| seen.insert(m.clone()));
            for member in &group.members {
                if let Some(prev) = out.membership.get(member)
                    && prev != &group.id
                {
                    return Err(ShadeError::GroupConflict {
                        shade: member.clone(),
                        first: prev.clone(),
                        second: group.id.clone(),
                    });
                }
                out.membership.insert(member.clone(), group.id.clone());
            }
            out.groups.insert(group.id.clone(), group);
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = &VisualGroup> {
        self.groups.values()
    }

    pub fn get(&self, group_id: &str) -> Option<&VisualGroup> {
        self.groups.get(group_id)
    }

    pub fn group_of(&self, shade: &ShadeId) -> Cohort {
        if let Some(group) = self.membership.get(shade) {
            return Cohort::Group(group.clone());
        }
        if self.groups.is_empty() {
            Cohort::All
        } else {
            Cohort::Standalone(shade.clone())
        }
    }

    /// Members of a cohort. `All` resolves against `known`.
    pub fn members_of<'a>(
        &self,
        cohort: &Cohort,
        known: impl IntoIterator<Item = &'a ShadeId>,
    ) -> Result<BTreeSet<ShadeId>, ShadeError> {
        match cohort {
            Cohort::Group(id) => self
                .groups
                .get(id)
                .map(|g| g.members.iter().cloned().collect())
                .ok_or_else(|| ShadeError::UnknownGroup(id.clone())),
            Cohort::Standalone(shade) => Ok(BTreeSet::from([shade.clone()])),
            Cohort::All => Ok(known.into_iter().cloned().collect()),
        }
    }

    /// Split shades into their cohorts, preserving first-seen order.
    pub fn partition<'a>(
        &self,
        shades: impl IntoIterator<Item = &'a ShadeId>,
    ) -> Vec<(Cohort, Vec<ShadeId>)> {
        let mut out: Vec<(Cohort, Vec<ShadeId>)> = Vec::new();
        for shade in shades {
            let cohort = self.group_of(shade);
            match out.iter_mut().find(|(c, _)| *c == cohort) {
                Some((_, members)) => {
                    if !members.contains(shade) {
                        members.push(shade.clone());
                    }
                }
                None => out.push((cohort, vec![shade.clone()])),
            }
        }
        out
    }

    pub fn display_name(&self, cohort: &Cohort) -> String {
        match cohort {
            Cohort::All => IMPLICIT_GROUP_NAME.to_string(),
            Cohort::Standalone(shade) => format!("Standalone ({shade})"),
            Cohort::Group(id) => self
                .groups
                .get(id)
                .map_or_else(|| id.clone(), |g| g.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, members: &[&str]) -> VisualGroup {
        VisualGroup {
            id: id.into(),
            name: String::new(),
            members: members.iter().map(|m| ShadeId::from(*m)).collect(),
        }
    }

    #[test]
    fn no_groups_means_one_implicit_cohort() {
        let reg = VisualGroupRegistry::default();
        let a = ShadeId::from("a");
        assert_eq!(reg.group_of(&a), Cohort::All);
        let known = [ShadeId::from("a"), ShadeId::from("b")];
        let members = reg.members_of(&Cohort::All, &known).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(reg.display_name(&Cohort::All), "All shades");
    }

    #[test]
    fn ungrouped_shades_become_standalone_once_groups_exist() {
        let reg = VisualGroupRegistry::new([group("living", &["a", "b"])]).unwrap();
        assert_eq!(reg.group_of(&"a".into()), Cohort::Group("living".into()));
        assert_eq!(
            reg.group_of(&"c".into()),
            Cohort::Standalone(ShadeId::from("c"))
        );
        assert_eq!(
            reg.display_name(&Cohort::Standalone("c".into())),
            "Standalone (c)"
        );
        assert_eq!(reg.display_name(&Cohort::Group("living".into())), "living");
    }

    #[test]
    fn shade_in_two_groups_is_rejected() {
        let err = VisualGroupRegistry::new([group("g1", &["a"]), group("g2", &["a"])]).unwrap_err();
        assert_eq!(
            err,
            ShadeError::GroupConflict {
                shade: "a".into(),
                first: "g1".into(),
                second: "g2".into()
            }
        );
    }

    #[test]
    fn unknown_group_is_an_error() {
        let reg = VisualGroupRegistry::new([group("g1", &["a"])]).unwrap();
        let none: [ShadeId; 0] = [];
        assert_eq!(
            reg.members_of(&Cohort::Group("nope".into()), &none),
            Err(ShadeError::UnknownGroup("nope".into()))
        );
    }

    #[test]
    fn partition_keeps_cohorts_apart() {
        let reg = VisualGroupRegistry::new([group("g1", &["a", "b"]), group("g2", &["c"])]).unwrap();
        let ids: Vec<ShadeId> = ["a", "c", "b", "d"].into_iter().map(ShadeId::from).collect();
        let parts = reg.partition(&ids);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0, Cohort::Group("g1".into()));
        assert_eq!(parts[0].1, vec![ShadeId::from("a"), ShadeId::from("b")]);
        assert_eq!(parts[1].0, Cohort::Group("g2".into()));
        assert_eq!(parts[2].0, Cohort::Standalone("d".into()));
    }
}
