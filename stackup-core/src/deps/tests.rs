use super::*;

fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    edges
        .iter()
        .map(|(name, deps)| {
            (
                name.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        })
        .collect()
}

#[test]
fn test_no_deps_single_level() {
    let g = graph(&[("b", &[]), ("a", &[])]);
    let levels = start_levels(&g).unwrap();
    assert_eq!(levels, vec![vec!["a", "b"]]);
}

#[test]
fn test_chain_deps() {
    let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
    let levels = start_levels(&g).unwrap();
    assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
}

#[test]
fn test_diamond_uses_max_depth() {
    // d depends on a (level 0) and c (level 2) so it lands at level 3
    let g = graph(&[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["b"]),
        ("d", &["a", "c"]),
    ]);
    let levels = start_levels(&g).unwrap();
    assert_eq!(levels.len(), 4);
    assert_eq!(levels[3], vec!["d"]);
}

#[test]
fn test_parallel_levels() {
    let g = graph(&[
        ("qdrant", &[]),
        ("neo4j", &[]),
        ("redis", &[]),
        ("api", &["qdrant", "neo4j", "redis"]),
        ("ui", &["api"]),
    ]);
    let levels = start_levels(&g).unwrap();
    assert_eq!(levels[0], vec!["neo4j", "qdrant", "redis"]);
    assert_eq!(levels[1], vec!["api"]);
    assert_eq!(levels[2], vec!["ui"]);
}

#[test]
fn test_cycle_detection() {
    let g = graph(&[("a", &["b"]), ("b", &["a"])]);
    let result = start_levels(&g);
    assert!(matches!(result, Err(StackError::DependencyCycle(_))));
}

#[test]
fn test_self_cycle() {
    let g = graph(&[("a", &["a"])]);
    let layering = layer_graph(&g);
    assert_eq!(layering.cyclic, vec!["a"]);
    assert!(layering.layers.is_empty());
}

#[test]
fn test_missing_dep() {
    let g = graph(&[("a", &["nonexistent"])]);
    let result = start_levels(&g);
    assert!(matches!(
        result,
        Err(StackError::MissingDependency { ref service, ref dependency })
            if service == "a" && dependency == "nonexistent"
    ));
}

#[test]
fn test_layering_separates_cyclic_and_blocked() {
    let g = graph(&[
        ("ok", &[]),
        ("x", &["y"]),
        ("y", &["x"]),
        ("downstream", &["x", "ok"]),
        ("dangling", &["ghost"]),
    ]);
    let layering = layer_graph(&g);

    assert_eq!(layering.cyclic, vec!["x", "y"]);
    assert_eq!(layering.blocked, vec!["downstream"]);
    assert_eq!(
        layering.missing,
        vec![("dangling".to_string(), "ghost".to_string())]
    );
    // Missing deps do not push a node down a level
    assert_eq!(layering.layers, vec![vec!["dangling", "ok"]]);
    assert!(!layering.is_complete());
}

#[test]
fn test_levels_are_deterministic() {
    let g = graph(&[("zebra", &[]), ("alpha", &[]), ("mango", &[])]);
    for _ in 0..5 {
        assert_eq!(
            start_levels(&g).unwrap(),
            vec![vec!["alpha", "mango", "zebra"]]
        );
    }
}
