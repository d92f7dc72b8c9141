use std::sync::Arc;

use rulegraph::{
    Action, Aspect, AssocType, AuthenticationContext, InMemoryGraph, InMemoryPermissions,
    NodeGraph, NodeRef, NodeType, Rule, RuleService, RuleServiceError, RuleSetError,
};

fn folder(graph: &InMemoryGraph, parent: NodeRef, name: &str) -> NodeRef {
    graph
        .create_node(parent, AssocType::Contains, name, NodeType::Folder)
        .unwrap()
        .child
}

fn tag(title: &str) -> Rule {
    Rule::new(title).action(Action::new("add-features").param("aspect-name", title))
}

fn titles(rules: &[Rule]) -> Vec<String> {
    rules.iter().map(|r| r.title.clone()).collect()
}

fn setup() -> (Arc<InMemoryGraph>, RuleService) {
    let graph = Arc::new(InMemoryGraph::new());
    let service = RuleService::new(graph.clone());
    (graph, service)
}

#[test]
fn linked_folder_sees_the_owners_rules() {
    let (graph, service) = setup();
    let owner = folder(&graph, graph.root(), "owner");
    let linker = folder(&graph, graph.root(), "linker");
    service.save_rule(owner, &mut tag("shared")).unwrap();

    let rule_set = service.link(owner, linker).unwrap();

    assert_eq!(service.get_rule_set_node(linker).unwrap(), Some(rule_set));
    assert_eq!(titles(&service.get_rules(linker, false).unwrap()), ["shared"]);
    assert!(service.is_linked_to_rule_node(linker).unwrap());
    assert!(!service.is_linked_to_rule_node(owner).unwrap());
    assert_eq!(service.get_linked_to_rule_node(linker).unwrap(), Some(owner));
    assert_eq!(service.get_linked_from_rule_nodes(owner).unwrap(), vec![linker]);
    assert!(service.is_rule_set_shared(rule_set).unwrap());
    assert!(graph.has_aspect(linker, &Aspect::RULES));
}

#[test]
fn linking_is_exclusive_with_owning() {
    let (graph, service) = setup();
    let a = folder(&graph, graph.root(), "a");
    let b = folder(&graph, graph.root(), "b");
    service.save_rule(a, &mut tag("a-rule")).unwrap();
    service.save_rule(b, &mut tag("b-rule")).unwrap();

    let err = service.link(a, b).unwrap_err();
    assert!(matches!(
        err,
        RuleServiceError::RuleSet(RuleSetError::AlreadyOwnsRules(f)) if f == b
    ));
    assert_eq!(titles(&service.get_rules(b, false).unwrap()), ["b-rule"]);

    service.remove_all_rules(b).unwrap();
    service.link(a, b).unwrap();
    assert!(service.is_linked_to_rule_node(b).unwrap());

    assert!(service.unlink(b).unwrap());
    assert!(service.get_rules(b, false).unwrap().is_empty());
    assert!(!service.is_linked_to_rule_node(b).unwrap());
    assert!(!graph.has_aspect(b, &Aspect::RULES));
    assert!(!service.unlink(b).unwrap());
}

#[test]
fn linked_folder_is_read_only() {
    let (graph, service) = setup();
    let owner = folder(&graph, graph.root(), "owner");
    let linker = folder(&graph, graph.root(), "linker");
    let mut rule = tag("shared");
    service.save_rule(owner, &mut rule).unwrap();
    service.link(owner, linker).unwrap();

    let err = service.save_rule(linker, &mut tag("extra")).unwrap_err();
    assert!(matches!(
        err,
        RuleServiceError::RuleSet(RuleSetError::LinkedFolderReadOnly(_))
    ));
    assert!(service.remove_rule(linker, &rule).is_err());
    assert_eq!(service.count_rules(owner).unwrap(), 1);
}

#[test]
fn link_errors() {
    let (graph, service) = setup();
    let empty = folder(&graph, graph.root(), "empty");
    let other = folder(&graph, graph.root(), "other");

    assert!(matches!(
        service.link(empty, other),
        Err(RuleServiceError::RuleSet(RuleSetError::NothingToLink(_)))
    ));
    assert!(matches!(
        service.link(empty, empty),
        Err(RuleServiceError::RuleSet(RuleSetError::SelfLink(_)))
    ));
}

#[test]
fn owner_deletion_cascades_to_linkers() {
    let (graph, service) = setup();
    let owner = folder(&graph, graph.root(), "owner");
    let x = folder(&graph, graph.root(), "x");
    let y = folder(&graph, graph.root(), "y");
    service.save_rule(owner, &mut tag("shared")).unwrap();
    service.link(owner, x).unwrap();
    service.link(owner, y).unwrap();
    assert_eq!(service.get_rules(x, true).unwrap().len(), 1);

    graph.delete_node(owner).unwrap();
    let _ = service.process_graph_events();

    for linker in [x, y] {
        assert!(service.get_rules(linker, true).unwrap().is_empty());
        assert!(!graph.has_aspect(linker, &Aspect::RULES));
        assert!(!service.is_linked_to_rule_node(linker).unwrap());
    }
}

#[test]
fn linker_deletion_leaves_others_intact() {
    let (graph, service) = setup();
    let owner = folder(&graph, graph.root(), "owner");
    let x = folder(&graph, graph.root(), "x");
    let y = folder(&graph, graph.root(), "y");
    service.save_rule(owner, &mut tag("shared")).unwrap();
    let rule_set = service.link(owner, x).unwrap();
    service.link(owner, y).unwrap();

    graph.delete_node(x).unwrap();
    let _ = service.process_graph_events();

    assert_eq!(titles(&service.get_rules(owner, true).unwrap()), ["shared"]);
    assert_eq!(titles(&service.get_rules(y, true).unwrap()), ["shared"]);
    assert!(graph.has_aspect(owner, &Aspect::RULES));
    assert!(graph.has_aspect(y, &Aspect::RULES));
    assert_eq!(service.get_linked_from_rule_nodes(owner).unwrap(), vec![y]);
    assert!(service.is_rule_set_shared(rule_set).unwrap());
}

#[test]
fn removing_all_rules_unlinks_everyone() {
    let (graph, service) = setup();
    let owner = folder(&graph, graph.root(), "owner");
    let linker = folder(&graph, graph.root(), "linker");
    service.save_rule(owner, &mut tag("shared")).unwrap();
    service.link(owner, linker).unwrap();

    service.remove_all_rules(owner).unwrap();

    assert!(service.get_rules(linker, true).unwrap().is_empty());
    assert!(!graph.has_aspect(linker, &Aspect::RULES));
    assert!(!graph.has_aspect(owner, &Aspect::RULES));
}

#[test]
fn association_with_folder_includes_inheritance() {
    let (graph, service) = setup();
    let owner = folder(&graph, graph.root(), "owner");
    let below = folder(&graph, owner, "below");
    let linker = folder(&graph, graph.root(), "linker");
    let unrelated = folder(&graph, graph.root(), "unrelated");
    service.save_rule(owner, &mut tag("shared")).unwrap();
    let rule_set = service.link(owner, linker).unwrap();

    assert!(service.is_rule_set_associated_with_folder(rule_set, owner).unwrap());
    assert!(service.is_rule_set_associated_with_folder(rule_set, linker).unwrap());
    assert!(service.is_rule_set_associated_with_folder(rule_set, below).unwrap());
    assert!(!service.is_rule_set_associated_with_folder(rule_set, unrelated).unwrap());
}

#[test]
fn link_requires_change_permission_on_the_target() {
    let graph = Arc::new(InMemoryGraph::new());
    let permissions = Arc::new(InMemoryPermissions::new());
    let auth = Arc::new(AuthenticationContext::new());
    let service = RuleService::new(graph.clone())
        .permissions(permissions.clone())
        .authentication(auth.clone());
    let owner = folder(&graph, graph.root(), "owner");
    let target = folder(&graph, graph.root(), "target");
    service.save_rule(owner, &mut tag("shared")).unwrap();

    permissions.deny_change("carol", target);
    auth.set_current_user("carol");
    assert!(matches!(
        service.link(owner, target),
        Err(RuleServiceError::AccessDenied { node, ref user }) if node == target && user == "carol"
    ));
    assert!(!service.is_linked_to_rule_node(target).unwrap());

    auth.run_as_system(|| service.link(owner, target)).unwrap();
    assert!(service.is_linked_to_rule_node(target).unwrap());
}
