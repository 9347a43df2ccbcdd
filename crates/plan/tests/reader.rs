use igloo_plan::{
    build, Distribution, OperatorKind, PhysicalPlan, PhysicalPlanReader, PlanError,
};

const PHYSICAL_TEST1: &str = include_str!("../resources/physical_test1.json");
const SIMPLE_EXCHANGE: &str = include_str!("../resources/physical_simpleexchange.json");
const JOIN: &str = include_str!("../resources/physical_join.json");

fn read(json: &str) -> Result<PhysicalPlan, PlanError> {
    PhysicalPlanReader::new().read_physical_plan(json)
}

#[test]
fn reads_single_chain_plan() {
    let plan = read(PHYSICAL_TEST1).expect("plan should parse");
    assert_eq!(plan.head.version, 1);
    assert_eq!(plan.root.id, 4);
    assert_eq!(plan.root.kind, OperatorKind::Screen);
    assert_eq!(plan.root.subtree_len(), 4);
    assert_eq!(plan.root.exchange_count(), 0);

    let scan = &plan.root.children[0].children[0].children[0];
    match &scan.kind {
        OperatorKind::Scan { table, splits, .. } => {
            assert_eq!(table, "lineitem");
            assert_eq!(splits.len(), 2);
            assert_eq!(splits[1].host, "node-b");
        }
        other => panic!("expected a scan, got {:?}", other),
    }
    assert_eq!(scan.cost.map(|c| c.rows), Some(100.0));
}

#[test]
fn reads_exchange_distributions() {
    let plan = read(SIMPLE_EXCHANGE).expect("plan should parse");
    assert_eq!(plan.root.exchange_count(), 2);
    let union = &plan.root.children[0].children[0];
    assert_eq!(
        union.kind,
        OperatorKind::Exchange {
            distribution: Distribution::Union
        }
    );
    let hash = &union.children[0].children[0];
    assert_eq!(
        hash.kind,
        OperatorKind::Exchange {
            distribution: Distribution::Hash {
                keys: vec!["o_custkey".to_string()]
            }
        }
    );
    assert!(hash.cost.is_none());
}

#[test]
fn keeps_multi_input_order() {
    let plan = read(JOIN).expect("plan should parse");
    assert_eq!(plan.root.subtree_len(), 12);
    assert_eq!(plan.root.exchange_count(), 4);
    let top_join = &plan.root.children[0].children[0].children[0];
    assert_eq!(top_join.id, 9);
    let inputs: Vec<u32> = top_join.children.iter().map(|c| c.id).collect();
    assert_eq!(inputs, vec![6, 8]);
}

#[test]
fn write_then_read_preserves_the_tree() {
    let reader = PhysicalPlanReader::new();
    let plan = read(JOIN).unwrap();
    let json = reader.write_physical_plan(&plan).unwrap();
    assert_eq!(reader.read_physical_plan(&json).unwrap(), plan);

    let built = PhysicalPlan::new(
        build::screen(3, build::filter(2, "a > 1", build::values(1, 5).with_cost(5.0, 5.0))).into_ref(),
    );
    let json = reader.write_physical_plan(&built).unwrap();
    assert_eq!(reader.read_physical_plan(&json).unwrap(), built);
}

#[test]
fn rejects_unsupported_version() {
    let json = r#"{ "head": { "version": 7 }, "graph": [ { "@id": 1, "pop": "values", "rows": 1 } ] }"#;
    match read(json) {
        Err(PlanError::UnsupportedVersion { found, expected }) => {
            assert_eq!(found, 7);
            assert_eq!(expected, 1);
        }
        other => panic!("expected version error, got {:?}", other),
    }
}

#[test]
fn rejects_dangling_reference() {
    let json = r#"{ "head": { "version": 1 }, "graph": [ { "@id": 2, "pop": "screen", "child": 9 } ] }"#;
    assert!(matches!(read(json), Err(PlanError::DanglingReference(9))));
}

#[test]
fn rejects_duplicate_ids() {
    let json = r#"{ "head": { "version": 1 }, "graph": [
        { "@id": 1, "pop": "values", "rows": 1 },
        { "@id": 1, "pop": "values", "rows": 2 }
    ] }"#;
    assert!(matches!(read(json), Err(PlanError::Malformed(_))));
}

#[test]
fn rejects_disconnected_subtree() {
    let json = r#"{ "head": { "version": 1 }, "graph": [
        { "@id": 1, "pop": "values", "rows": 1 },
        { "@id": 2, "pop": "screen", "child": 1 },
        { "@id": 3, "pop": "values", "rows": 1 }
    ] }"#;
    match read(json) {
        Err(PlanError::Malformed(reason)) => assert!(reason.contains("disconnected"), "{}", reason),
        other => panic!("expected malformed plan, got {:?}", other),
    }
}

#[test]
fn rejects_cycle_detached_from_root() {
    let json = r#"{ "head": { "version": 1 }, "graph": [
        { "@id": 1, "pop": "values", "rows": 1 },
        { "@id": 2, "pop": "screen", "child": 1 },
        { "@id": 3, "pop": "filter", "child": 4, "predicate": "x" },
        { "@id": 4, "pop": "filter", "child": 3, "predicate": "y" }
    ] }"#;
    match read(json) {
        Err(PlanError::Malformed(reason)) => assert!(reason.contains("[3, 4]"), "{}", reason),
        other => panic!("expected malformed plan, got {:?}", other),
    }
}

#[test]
fn rejects_shared_input() {
    let json = r#"{ "head": { "version": 1 }, "graph": [
        { "@id": 1, "pop": "values", "rows": 1 },
        { "@id": 2, "pop": "union-all", "children": [1, 1] },
        { "@id": 3, "pop": "screen", "child": 2 }
    ] }"#;
    assert!(matches!(read(json), Err(PlanError::Malformed(_))));
}

#[test]
fn rejects_unknown_operator() {
    let json = r#"{ "head": { "version": 1 }, "graph": [ { "@id": 1, "pop": "teleport" } ] }"#;
    assert!(matches!(read(json), Err(PlanError::Json(_))));
}

#[test]
fn reads_and_writes_very_deep_chains() {
    let depth: u32 = 200_000;
    let mut graph = vec![r#"{ "@id": 0, "pop": "values", "rows": 5 }"#.to_string()];
    graph.extend((1..depth).map(|id| {
        format!(
            r#"{{ "@id": {}, "pop": "filter", "predicate": "x > 0", "child": {} }}"#,
            id,
            id - 1
        )
    }));
    let json = format!(
        r#"{{ "head": {{ "version": 1 }}, "graph": [{}] }}"#,
        graph.join(",")
    );

    let plan = read(&json).unwrap();
    assert_eq!(plan.root.id, depth - 1);
    assert_eq!(plan.root.subtree_len(), depth as usize);

    let written = PhysicalPlanReader::new().write_physical_plan(&plan).unwrap();
    let reread = read(&written).unwrap();
    assert_eq!(reread.root.subtree_len(), depth as usize);
    assert_eq!(
        reread.root.iter().last().map(|op| op.kind.clone()),
        Some(OperatorKind::Values { rows: 5 })
    );
}
