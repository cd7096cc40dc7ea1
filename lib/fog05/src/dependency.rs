// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orders the components of an application so that every component comes
//! after everything it needs.
//!
//! Ordering proceeds in rounds: each round emits every remaining component
//! whose needs have all been emitted already (sorted by name within the
//! round). If a round emits nothing while components remain, those
//! components sit on or behind a cycle and ordering fails.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("dependency cycle among components: {}", .0.join(", "))]
    Cyclic(Vec<String>),

    #[error("component {component} needs unknown component {need}")]
    UnknownDependency { component: String, need: String },

    #[error("component {0} is declared more than once")]
    Duplicate(String),
}

/// Computes an instantiation order for `(name, needs)` pairs.
pub fn dependency_order<'a, I, N>(
    components: I,
) -> Result<Vec<String>, DependencyError>
where
    I: IntoIterator<Item = (&'a str, N)>,
    N: IntoIterator<Item = &'a str>,
{
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, needs) in components {
        let needs: BTreeSet<&str> = needs.into_iter().collect();
        if pending.insert(name, needs).is_some() {
            return Err(DependencyError::Duplicate(name.to_string()));
        }
    }

    for (name, needs) in &pending {
        if let Some(unknown) = needs.iter().find(|n| !pending.contains_key(*n))
        {
            return Err(DependencyError::UnknownDependency {
                component: name.to_string(),
                need: unknown.to_string(),
            });
        }
    }

    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, needs)| needs.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            return Err(DependencyError::Cyclic(
                pending.keys().map(|k| k.to_string()).collect(),
            ));
        }

        for name in &ready {
            pending.remove(name);
        }
        for needs in pending.values_mut() {
            for name in &ready {
                needs.remove(name);
            }
        }
        order.extend(ready.into_iter().map(str::to_string));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(
        graph: &[(&'static str, &[&'static str])],
    ) -> Result<Vec<String>, DependencyError> {
        dependency_order(
            graph.iter().map(|(name, needs)| (*name, needs.iter().copied())),
        )
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn five_component_example() {
        let out = order(&[
            ("c1", &["c2", "c3"]),
            ("c2", &["c3"]),
            ("c3", &["c4"]),
            ("c4", &[]),
            ("c5", &[]),
        ])
        .unwrap();

        assert_eq!(out, vec!["c4", "c5", "c3", "c2", "c1"]);
        assert!(position(&out, "c4") < position(&out, "c3"));
        assert!(position(&out, "c5") < position(&out, "c3"));
        assert!(position(&out, "c3") < position(&out, "c2"));
        assert!(position(&out, "c2") < position(&out, "c1"));
    }

    #[test]
    fn every_need_precedes_its_dependent() {
        let graph: &[(&str, &[&str])] = &[
            ("web", &["api", "cache"]),
            ("api", &["db", "queue"]),
            ("worker", &["queue", "db"]),
            ("cache", &[]),
            ("db", &[]),
            ("queue", &["db"]),
        ];
        let out = order(graph).unwrap();
        assert_eq!(out.len(), graph.len());
        for (name, needs) in graph {
            for need in *needs {
                assert!(position(&out, need) < position(&out, name));
            }
        }
    }

    #[test]
    fn cycles_are_reported_with_their_members() {
        let err = order(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
            ("d", &[]),
            ("e", &["a"]),
        ])
        .unwrap_err();
        // `e` never becomes ready because it sits behind the cycle.
        assert_eq!(
            err,
            DependencyError::Cyclic(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "e".to_string()
            ])
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        assert!(matches!(
            order(&[("a", &["a"])]),
            Err(DependencyError::Cyclic(names)) if names == vec!["a"]
        ));
    }

    #[test]
    fn unknown_and_duplicate_components_are_rejected() {
        assert_eq!(
            order(&[("a", &["ghost"])]),
            Err(DependencyError::UnknownDependency {
                component: "a".to_string(),
                need: "ghost".to_string()
            })
        );
        assert_eq!(
            order(&[("a", &[]), ("a", &[])]),
            Err(DependencyError::Duplicate("a".to_string()))
        );
    }

    #[test]
    fn empty_input_yields_empty_order() {
        assert_eq!(order(&[]).unwrap(), Vec::<String>::new());
    }
}
