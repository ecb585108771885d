use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};

use flow_spec::{ComparisonOp, Context, EngineConfig, Rule, RuleError, RuleEvaluator};

fn pinned() -> Context {
    Context::new().at(Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap())
}

#[test]
fn missing_field_never_equals() {
    let mut evaluator = RuleEvaluator::new();
    let rule = Rule::equals("$.age", 18);
    assert!(!evaluator.evaluate(&rule, &json!({}), &Context::new()).unwrap());
    assert!(evaluator.evaluate(&rule, &json!({ "age": 18.0 }), &Context::new()).unwrap());

    let neq = Rule::compare(ComparisonOp::Neq, "$.age", 18);
    assert!(!evaluator.evaluate(&neq, &json!({}), &Context::new()).unwrap());
}

#[test]
fn ordering_coerces_to_numbers() {
    let mut evaluator = RuleEvaluator::new();
    let ctx = Context::new();
    let data = json!({ "age": "21", "blank": "", "word": "abc", "flag": true });

    let adult = Rule::compare(ComparisonOp::Gte, "$.age", 18);
    assert!(evaluator.evaluate(&adult, &data, &ctx).unwrap());
    let blank = Rule::compare(ComparisonOp::Lt, "$.blank", 1);
    assert!(evaluator.evaluate(&blank, &data, &ctx).unwrap());
    let flag = Rule::compare(ComparisonOp::Gte, "$.flag", 1);
    assert!(evaluator.evaluate(&flag, &data, &ctx).unwrap());

    // NaN never orders.
    let word_gt = Rule::compare(ComparisonOp::Gt, "$.word", 0);
    let word_lte = Rule::compare(ComparisonOp::Lte, "$.word", 0);
    assert!(!evaluator.evaluate(&word_gt, &data, &ctx).unwrap());
    assert!(!evaluator.evaluate(&word_lte, &data, &ctx).unwrap());
}

#[test]
fn equality_does_not_coerce_types() {
    let mut evaluator = RuleEvaluator::new();
    let rule = Rule::equals("$.count", "3");
    assert!(!evaluator.evaluate(&rule, &json!({ "count": 3 }), &Context::new()).unwrap());
}

#[test]
fn membership_requires_an_array() {
    let mut evaluator = RuleEvaluator::new();
    let ctx = Context::new();
    let data = json!({ "country": "NL" });

    let listed = Rule::compare(ComparisonOp::In, "$.country", json!(["BE", "NL", "LU"]));
    assert!(evaluator.evaluate(&listed, &data, &ctx).unwrap());
    let scalar = Rule::compare(ComparisonOp::In, "$.country", "NL");
    assert!(!evaluator.evaluate(&scalar, &data, &ctx).unwrap());
}

#[test]
fn regex_accepts_flags_and_rejects_bad_patterns() {
    let mut evaluator = RuleEvaluator::new();
    let ctx = Context::new();
    let data = json!({ "email": "Ada@Example.org", "age": 36 });

    let plain = Rule::compare(ComparisonOp::Regex, "$.email", "^[a-z]+@");
    assert!(!evaluator.evaluate(&plain, &data, &ctx).unwrap());
    let insensitive = Rule::compare(
        ComparisonOp::Regex,
        "$.email",
        json!({ "pattern": "^[a-z]+@", "flags": "i" }),
    );
    assert!(evaluator.evaluate(&insensitive, &data, &ctx).unwrap());

    let not_text = Rule::compare(ComparisonOp::Regex, "$.age", "3");
    assert!(!evaluator.evaluate(&not_text, &data, &ctx).unwrap());

    let broken = Rule::compare(ComparisonOp::Regex, "$.email", "(unclosed");
    let err = evaluator.evaluate(&broken, &data, &ctx).unwrap_err();
    assert!(matches!(err, RuleError::InvalidPattern { .. }));
}

#[test]
fn context_references_resolve() {
    let mut evaluator = RuleEvaluator::new();
    let data = json!({});

    let production = Rule::equals("@env", "production");
    assert!(evaluator.evaluate(&production, &data, &Context::new()).unwrap());
    let staging = Context::new().with_environment("staging");
    assert!(!evaluator.evaluate(&production, &data, &staging).unwrap());

    let today = Rule::equals("@today", "2024-03-15");
    assert!(evaluator.evaluate(&today, &data, &pinned()).unwrap());

    let after = Rule::compare(ComparisonOp::Gt, "@now", 1_700_000_000_000i64);
    assert!(evaluator.evaluate(&after, &data, &pinned()).unwrap());

    let role = Rule::equals("@user.role", "admin");
    let ctx = Context::new().with_value("user", json!({ "role": "admin" }));
    assert!(evaluator.evaluate(&role, &data, &ctx).unwrap());
    assert!(!evaluator.evaluate(&role, &data, &Context::new()).unwrap());
}

#[test]
fn environment_falls_back_to_configuration() {
    let config = EngineConfig {
        environment: "test".into(),
        ..EngineConfig::default()
    };
    let mut evaluator = RuleEvaluator::with_config(&config);
    let rule = Rule::equals("@env", "test");
    assert!(evaluator.evaluate(&rule, &json!({}), &Context::new()).unwrap());
}

#[test]
fn custom_functions_dispatch_by_name() {
    let mut evaluator = RuleEvaluator::new();
    let ctx = Context::new();
    let rule = Rule::custom("longer_than", vec![json!("$.name"), json!(3)]);

    let err = evaluator.evaluate(&rule, &json!({ "name": "Ada" }), &ctx).unwrap_err();
    assert!(matches!(err, RuleError::UnknownFunction(name) if name == "longer_than"));

    evaluator.register_function("longer_than", |args, _data, _ctx| {
        let text = args[0].as_str().ok_or("name must be a string")?;
        let min = args[1].as_u64().ok_or("length must be a number")?;
        Ok(text.chars().count() as u64 > min)
    });
    assert!(evaluator.has_function("longer_than"));
    assert!(!evaluator.evaluate(&rule, &json!({ "name": "Ada" }), &ctx).unwrap());
    assert!(evaluator.evaluate(&rule, &json!({ "name": "Grace" }), &ctx).unwrap());

    let err = evaluator.evaluate(&rule, &json!({ "name": 7 }), &ctx).unwrap_err();
    assert!(matches!(err, RuleError::Function { .. }));
}

#[test]
fn not_without_arguments_is_true() {
    let mut evaluator = RuleEvaluator::new();
    let rule: Rule = serde_json::from_value(json!({ "type": "logical", "op": "not" })).unwrap();
    assert!(evaluator.evaluate(&rule, &json!({}), &Context::new()).unwrap());
}

#[test]
fn evaluation_budget_is_enforced_per_call() {
    let config = EngineConfig {
        max_evaluations: 4,
        ..EngineConfig::default()
    };
    let mut evaluator = RuleEvaluator::with_config(&config);
    let ctx = Context::new();

    let small = Rule::all(vec![Rule::always(), Rule::always()]);
    for value in 0..3 {
        assert!(evaluator.evaluate(&small, &json!({ "n": value }), &ctx).unwrap());
    }

    let large = Rule::all(vec![Rule::always(); 5]);
    let err = evaluator.evaluate(&large, &json!({}), &ctx).unwrap_err();
    assert!(matches!(err, RuleError::EvaluationLimit { limit: 4 }));
}

#[test]
fn results_are_memoized_until_cleared() {
    let mut evaluator = RuleEvaluator::new();
    let ctx = Context::new();
    let rule = Rule::equals("$.a", 1);

    evaluator.evaluate(&rule, &json!({ "a": 1 }), &ctx).unwrap();
    evaluator.evaluate(&rule, &json!({ "a": 1 }), &ctx).unwrap();
    assert_eq!(evaluator.cached_results(), 1);
    assert!(!evaluator.evaluate(&rule, &json!({ "a": 2 }), &ctx).unwrap());
    assert_eq!(evaluator.cached_results(), 2);

    evaluator.clear_cache();
    assert_eq!(evaluator.cached_results(), 0);
}

#[test]
fn clock_rules_skip_the_cache_unless_pinned() {
    let mut evaluator = RuleEvaluator::new();
    let rule = Rule::compare(ComparisonOp::Gt, "@now", 0);

    evaluator.evaluate(&rule, &json!({}), &Context::new()).unwrap();
    assert_eq!(evaluator.cached_results(), 0);
    evaluator.evaluate(&rule, &json!({}), &pinned()).unwrap();
    assert_eq!(evaluator.cached_results(), 1);
}

fn literal() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-50i64..50).prop_map(Value::from),
        "[a-z]{0,3}".prop_map(Value::from),
    ]
}

fn operand(with_data: bool) -> BoxedStrategy<Value> {
    if with_data {
        prop_oneof![
            literal(),
            prop::sample::select(vec!["$.a", "$.b", "$.nested.c"]).prop_map(Value::from),
        ]
        .boxed()
    } else {
        literal().boxed()
    }
}

fn rule_tree(with_data: bool) -> impl Strategy<Value = Rule> {
    let op = prop::sample::select(vec![
        ComparisonOp::Eq,
        ComparisonOp::Neq,
        ComparisonOp::Gt,
        ComparisonOp::Gte,
        ComparisonOp::Lt,
        ComparisonOp::Lte,
        ComparisonOp::In,
        ComparisonOp::Regex,
    ]);
    let leaf = prop_oneof![
        any::<Option<bool>>().prop_map(|value| Rule::Always { value }),
        (op, operand(with_data), operand(with_data))
            .prop_map(|(op, left, right)| Rule::compare(op, left, right)),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Rule::all),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Rule::any),
            inner.prop_map(Rule::negate),
        ]
    })
}

fn snapshot() -> impl Strategy<Value = Value> {
    (literal(), literal(), literal()).prop_map(|(a, b, c)| json!({ "a": a, "b": b, "nested": { "c": c } }))
}

proptest! {
    #[test]
    fn data_free_rules_ignore_the_snapshot(
        rule in rule_tree(false),
        first in snapshot(),
        second in snapshot(),
    ) {
        prop_assert!(!rule.reads_data());
        let mut evaluator = RuleEvaluator::new();
        let ctx = Context::new();
        let left = evaluator.evaluate(&rule, &first, &ctx).unwrap();
        let right = evaluator.evaluate(&rule, &second, &ctx).unwrap();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn not_inverts_any_rule(rule in rule_tree(true), data in snapshot()) {
        let mut evaluator = RuleEvaluator::new();
        let ctx = Context::new();
        let plain = evaluator.evaluate(&rule, &data, &ctx).unwrap();
        let negated = evaluator.evaluate(&Rule::negate(rule), &data, &ctx).unwrap();
        prop_assert_eq!(negated, !plain);
    }

    #[test]
    fn empty_connectives_are_identities(data in snapshot()) {
        let mut evaluator = RuleEvaluator::new();
        let ctx = Context::new();
        prop_assert!(evaluator.evaluate(&Rule::all(Vec::new()), &data, &ctx).unwrap());
        prop_assert!(!evaluator.evaluate(&Rule::any(Vec::new()), &data, &ctx).unwrap());
    }
}
