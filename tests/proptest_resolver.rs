
use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use rulegraph::{
    Action, AssocType, InMemoryGraph, NodeGraph, NodeType, Rule, RuleService, RuleSetResolver,
};
use strategies::{ancestors_or_self, arb_graph_and_start, arb_reorder};

// ---------------------------------------------------------------------------
// Resolver: terminates on any graph, lists each supplier once, start last.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn resolver_lists_each_supplier_once((shape, start) in arb_graph_and_start()) {
        let (graph, nodes) = shape.build();
        let start = nodes[start];
        let suppliers = RuleSetResolver::new()
            .nodes_supplying_rule_sets(&graph, start)
            .unwrap();

        let distinct: HashSet<_> = suppliers.iter().copied().collect();
        prop_assert_eq!(distinct.len(), suppliers.len(), "duplicate supplier in {:?}", suppliers);
        prop_assert_eq!(suppliers.last().copied(), Some(start));

        let reachable = ancestors_or_self(&graph, start);
        for supplier in &suppliers {
            prop_assert!(reachable.contains(supplier), "{} is not above {}", supplier, start);
        }
    }

    #[test]
    fn resolver_is_deterministic((shape, start) in arb_graph_and_start()) {
        let (graph, nodes) = shape.build();
        let resolver = RuleSetResolver::new();
        let first = resolver.nodes_supplying_rule_sets(&graph, nodes[start]).unwrap();
        let again = resolver.nodes_supplying_rule_sets(&graph, nodes[start]).unwrap();
        prop_assert_eq!(first, again);
    }

    #[test]
    fn strict_resolver_is_a_subset((shape, start) in arb_graph_and_start()) {
        let (graph, nodes) = shape.build();
        let lenient: HashSet<_> = RuleSetResolver::new()
            .nodes_supplying_rule_sets(&graph, nodes[start])
            .unwrap()
            .into_iter()
            .collect();
        let strict = RuleSetResolver::new()
            .ignore_aspect_on_target(true)
            .nodes_supplying_rule_sets(&graph, nodes[start])
            .unwrap();
        for node in strict {
            prop_assert!(lenient.contains(&node));
        }
    }
}

// ---------------------------------------------------------------------------
// Reordering moves one rule and shifts the others by one slot.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn reorder_is_stable((n, from, to) in arb_reorder()) {
        let graph = Arc::new(InMemoryGraph::new());
        let service = RuleService::new(graph.clone());
        let folder = graph
            .create_node(graph.root(), AssocType::Contains, "f", NodeType::Folder)
            .unwrap()
            .child;
        let mut rules: Vec<Rule> = (0..n)
            .map(|i| {
                Rule::new(&format!("r{i}"))
                    .action(Action::new("add-features").param("aspect-name", "x"))
            })
            .collect();
        for rule in &mut rules {
            service.save_rule(folder, rule).unwrap();
        }

        service.set_rule_position(folder, &rules[from], to).unwrap();

        let mut expected: Vec<String> = rules.iter().map(|r| r.title.clone()).collect();
        let moved = expected.remove(from);
        expected.insert(to, moved);
        let actual: Vec<String> = service
            .get_rules(folder, false)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        prop_assert_eq!(actual, expected);
    }
}
