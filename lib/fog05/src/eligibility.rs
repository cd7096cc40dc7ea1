// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Selection of nodes able to host a workload.
//!
//! `os` and `arch` narrow the candidate pool first. The network, I/O and
//! accelerator categories are then checked independently for every remaining
//! node, and a node is eligible if it passes every category the constraint
//! set actually names. Unnamed categories impose nothing.

use std::collections::BTreeSet;

use fog05_api_types::{
    AcceleratorConstraint, CountConstraint, NodeDescriptor,
    PlacementConstraints,
};
use rand::seq::IteratorRandom;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("no node satisfies the placement constraints")]
    NoEligibleNode,
}

fn satisfies_networks(
    node: &NodeDescriptor,
    wanted: &[CountConstraint],
) -> bool {
    wanted.iter().all(|c| {
        let available = node
            .network
            .iter()
            .filter(|i| i.available && i.intf_type == c.kind)
            .count();
        available >= c.count as usize
    })
}

fn satisfies_io(node: &NodeDescriptor, wanted: &[CountConstraint]) -> bool {
    wanted.iter().all(|c| {
        let available = node
            .io
            .iter()
            .filter(|d| d.available && d.io_type == c.kind)
            .count();
        available >= c.count as usize
    })
}

fn satisfies_accelerators(
    node: &NodeDescriptor,
    wanted: &[AcceleratorConstraint],
) -> bool {
    wanted.iter().all(|c| {
        node.accelerator
            .iter()
            .any(|a| a.supported_library.iter().any(|lib| *lib == c.kind))
    })
}

/// Computes the uuids of the nodes in `nodes` that satisfy `constraints`.
pub fn eligible_nodes(
    nodes: &[NodeDescriptor],
    constraints: Option<&PlacementConstraints>,
) -> BTreeSet<Uuid> {
    let Some(constraints) = constraints else {
        return nodes.iter().map(|n| n.uuid).collect();
    };

    let mut pool: Vec<&NodeDescriptor> = nodes.iter().collect();
    if let Some(os) = &constraints.os {
        pool.retain(|n| n.os == *os);
    }
    if let Some(arch) = &constraints.arch {
        pool.retain(|n| n.arch() == Some(arch.as_str()));
    }

    // Each category that is present yields its own passing set; the result is
    // their intersection, starting from the narrowed pool.
    let mut eligible: BTreeSet<Uuid> = pool.iter().map(|n| n.uuid).collect();
    if let Some(wanted) = &constraints.networks {
        let passing: BTreeSet<Uuid> = pool
            .iter()
            .filter(|n| satisfies_networks(n, wanted))
            .map(|n| n.uuid)
            .collect();
        eligible = &eligible & &passing;
    }
    if let Some(wanted) = &constraints.io {
        let passing: BTreeSet<Uuid> = pool
            .iter()
            .filter(|n| satisfies_io(n, wanted))
            .map(|n| n.uuid)
            .collect();
        eligible = &eligible & &passing;
    }
    if let Some(wanted) = &constraints.accelerators {
        let passing: BTreeSet<Uuid> = pool
            .iter()
            .filter(|n| satisfies_accelerators(n, wanted))
            .map(|n| n.uuid)
            .collect();
        eligible = &eligible & &passing;
    }

    eligible
}

/// Picks one node uniformly at random from the eligible set.
pub fn select_node<R: Rng + ?Sized>(
    eligible: &BTreeSet<Uuid>,
    rng: &mut R,
) -> Result<Uuid, EligibilityError> {
    eligible.iter().copied().choose(rng).ok_or(EligibilityError::NoEligibleNode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fog05_api_types::{
        AcceleratorSpec, CpuSpec, IoDeviceSpec, NetworkInterfaceSpec, RamSpec,
    };
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn node(
        os: &str,
        arch: &str,
        nics: &[(&str, bool)],
        io: &[&str],
        libs: &[&str],
    ) -> NodeDescriptor {
        NodeDescriptor {
            uuid: Uuid::new_v4(),
            name: "n".to_string(),
            os: os.to_string(),
            cpu: vec![CpuSpec {
                model: "generic".to_string(),
                frequency_mhz: 1000,
                arch: arch.to_string(),
            }],
            ram: RamSpec { size_mb: 1024 },
            disks: vec![],
            network: nics
                .iter()
                .enumerate()
                .map(|(i, (kind, available))| NetworkInterfaceSpec {
                    intf_name: format!("if{}", i),
                    intf_type: kind.to_string(),
                    address: None,
                    available: *available,
                })
                .collect(),
            io: io
                .iter()
                .map(|kind| IoDeviceSpec {
                    name: kind.to_string(),
                    io_type: kind.to_string(),
                    io_file: None,
                    available: true,
                })
                .collect(),
            accelerator: libs
                .iter()
                .map(|lib| AcceleratorSpec {
                    name: "acc".to_string(),
                    hw_address: None,
                    supported_library: vec![lib.to_string()],
                })
                .collect(),
            plugins: vec![],
        }
    }

    fn count(kind: &str, count: u32) -> CountConstraint {
        CountConstraint { kind: kind.to_string(), count }
    }

    #[test]
    fn no_constraints_means_every_node() {
        let nodes = vec![
            node("linux", "x86_64", &[], &[], &[]),
            node("windows", "aarch64", &[], &[], &[]),
        ];
        assert_eq!(eligible_nodes(&nodes, None).len(), 2);
        let empty = PlacementConstraints::default();
        assert_eq!(eligible_nodes(&nodes, Some(&empty)).len(), 2);
    }

    #[test]
    fn os_and_arch_narrow_the_pool() {
        let a = node("linux", "x86_64", &[], &[], &[]);
        let b = node("linux", "aarch64", &[], &[], &[]);
        let c = node("freebsd", "x86_64", &[], &[], &[]);
        let nodes = vec![a.clone(), b, c];

        let constraints = PlacementConstraints {
            os: Some("linux".to_string()),
            arch: Some("x86_64".to_string()),
            ..Default::default()
        };
        let eligible = eligible_nodes(&nodes, Some(&constraints));
        assert_eq!(eligible, BTreeSet::from([a.uuid]));
    }

    #[test]
    fn network_constraint_counts_only_available_interfaces() {
        let two = node(
            "linux",
            "x86_64",
            &[("ethernet", true), ("ethernet", true)],
            &[],
            &[],
        );
        let one_busy = node(
            "linux",
            "x86_64",
            &[("ethernet", true), ("ethernet", false)],
            &[],
            &[],
        );
        let nodes = vec![two.clone(), one_busy];
        let constraints = PlacementConstraints {
            networks: Some(vec![count("ethernet", 2)]),
            ..Default::default()
        };
        assert_eq!(
            eligible_nodes(&nodes, Some(&constraints)),
            BTreeSet::from([two.uuid])
        );
    }

    #[test]
    fn present_categories_are_intersected() {
        let net_only = node("linux", "x86_64", &[("wireless", true)], &[], &[]);
        let io_only = node("linux", "x86_64", &[], &["gpio"], &[]);
        let both = node(
            "linux",
            "x86_64",
            &[("wireless", true)],
            &["gpio"],
            &["cuda"],
        );
        let nodes = vec![net_only.clone(), io_only, both.clone()];

        let net = PlacementConstraints {
            networks: Some(vec![count("wireless", 1)]),
            ..Default::default()
        };
        assert_eq!(
            eligible_nodes(&nodes, Some(&net)),
            BTreeSet::from([net_only.uuid, both.uuid])
        );

        let net_io = PlacementConstraints {
            io: Some(vec![count("gpio", 1)]),
            ..net.clone()
        };
        assert_eq!(
            eligible_nodes(&nodes, Some(&net_io)),
            BTreeSet::from([both.uuid])
        );

        let acc = PlacementConstraints {
            accelerators: Some(vec![AcceleratorConstraint {
                kind: "cuda".to_string(),
            }]),
            ..Default::default()
        };
        assert_eq!(
            eligible_nodes(&nodes, Some(&acc)),
            BTreeSet::from([both.uuid])
        );
    }

    #[test]
    fn selection_fails_on_empty_set() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        assert_eq!(
            select_node(&BTreeSet::new(), &mut rng),
            Err(EligibilityError::NoEligibleNode)
        );

        let only = Uuid::new_v4();
        assert_eq!(select_node(&BTreeSet::from([only]), &mut rng), Ok(only));
    }

    #[test]
    fn selection_draws_from_the_eligible_set() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let set: BTreeSet<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            let pick = select_node(&set, &mut rng).unwrap();
            assert!(set.contains(&pick));
            seen.insert(pick);
        }
        // With 200 draws over 8 candidates, every candidate shows up.
        assert_eq!(seen, set);
    }

    fn arb_node() -> impl Strategy<Value = NodeDescriptor> {
        (
            prop::sample::select(vec!["linux", "windows"]),
            prop::sample::select(vec!["x86_64", "aarch64"]),
            prop::collection::vec(
                (
                    prop::sample::select(vec!["ethernet", "wireless"]),
                    any::<bool>(),
                ),
                0..4,
            ),
            prop::collection::vec(
                prop::sample::select(vec!["gpio", "i2c"]),
                0..3,
            ),
            prop::collection::vec(
                prop::sample::select(vec!["cuda", "opencl"]),
                0..2,
            ),
        )
            .prop_map(|(os, arch, nics, io, libs)| {
                node(os, arch, &nics, &io, &libs)
            })
    }

    fn arb_constraints() -> impl Strategy<Value = PlacementConstraints> {
        let counts = |kinds: Vec<&'static str>| {
            prop::option::of(prop::collection::vec(
                (prop::sample::select(kinds), 0u32..3)
                    .prop_map(|(k, c)| count(k, c)),
                0..2,
            ))
        };
        (
            prop::option::of(prop::sample::select(vec!["linux", "windows"])),
            prop::option::of(prop::sample::select(vec!["x86_64", "aarch64"])),
            counts(vec!["ethernet", "wireless"]),
            counts(vec!["gpio", "i2c"]),
            prop::option::of(prop::collection::vec(
                prop::sample::select(vec!["cuda", "opencl"]).prop_map(|k| {
                    AcceleratorConstraint { kind: k.to_string() }
                }),
                0..2,
            )),
        )
            .prop_map(|(os, arch, networks, io, accelerators)| {
                PlacementConstraints {
                    os: os.map(str::to_string),
                    arch: arch.map(str::to_string),
                    networks,
                    io,
                    accelerators,
                }
            })
    }

    proptest! {
        #[test]
        fn adding_a_category_never_grows_the_eligible_set(
            nodes in prop::collection::vec(arb_node(), 0..8),
            full in arb_constraints(),
            drop in 0usize..5,
        ) {
            // Remove one category from the full set; the full set must be a
            // subset of the reduced one.
            let mut reduced = full.clone();
            match drop {
                0 => reduced.os = None,
                1 => reduced.arch = None,
                2 => reduced.networks = None,
                3 => reduced.io = None,
                _ => reduced.accelerators = None,
            }
            let with = eligible_nodes(&nodes, Some(&full));
            let without = eligible_nodes(&nodes, Some(&reduced));
            prop_assert!(with.is_subset(&without));
        }
    }
}
