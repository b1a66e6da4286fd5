//! Resolution and execution through a request context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use collection_literals::btree;
use hotmod_core::{path, Value};
use hotmod_dispatch::{
    host_fn, BudgetTable, DispatchError, Dispatcher, HostError, RuntimeConfig,
};
use hotmod_overrides::{ExtensionPoint, Manifest, OverridePayload, Scope};
use hotmod_sandbox::{Budget, FaultKind, Resource, SandboxConfig};
use hotmod_state::{Capability, ProtectedState};

fn cart(items: &str) -> Value {
    Value::Map(btree! {
        "a".to_string() => Value::from(items),
    })
}

fn manifest() -> Manifest {
    Manifest::from_points([
        ExtensionPoint::new("fun1", 1),
        ExtensionPoint::new("discount", 0)
            .with_state(Capability::read_only([path!("cart")])),
        ExtensionPoint::new("scratch", 0)
            .with_state(Capability::private_copy([path!("cart")])),
        ExtensionPoint::new("sum", 2),
    ])
    .unwrap()
}

fn state() -> Arc<ProtectedState> {
    Arc::new(ProtectedState::new(Value::Map(btree! {
        "cart".to_string() => Value::Map(btree! {
            "total".to_string() => Value::Integer(10),
        }),
        "secret".to_string() => Value::from("hunter2"),
    })))
}

fn config(units: usize) -> RuntimeConfig {
    RuntimeConfig {
        budgets: BudgetTable::uniform(Budget::default().with_deadline(Duration::from_millis(100))),
        sandbox: SandboxConfig {
            units,
            grace_ms: 200,
            ..SandboxConfig::default()
        },
        ..RuntimeConfig::default()
    }
}

fn dispatcher(service: OverridePayload, units: usize) -> Dispatcher {
    Dispatcher::builder()
        .manifest(manifest())
        .state(state())
        .config(config(units))
        .host("fun1", host_fn(|_| Ok(Value::Integer(42))))
        .host("discount", |_: &[Value], state: &ProtectedState| -> Result<Value, HostError> {
            Ok(state.get(&path!("cart/total")).unwrap_or(Value::Null))
        })
        .host("scratch", host_fn(|_| Ok(Value::Null)))
        .host("sum", host_fn(|args| {
            let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
            Ok(Value::Integer(sum))
        }))
        .service(service)
        .build()
        .unwrap()
}

#[tokio::test]
async fn most_specific_scope_wins() {
    let dispatcher = dispatcher(OverridePayload::new(), 2);
    let configuration = dispatcher
        .configuration("cfg-1", &OverridePayload::new().with("fun1", "input.a.len()"))
        .unwrap();
    let request_payload = OverridePayload::new().with("fun1", "input.a.len() * 2");

    let plain = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();
    assert_eq!(plain.dispatch("fun1", vec![cart("hello")]).await.unwrap(), Value::Integer(42));
    assert_eq!(plain.owner("fun1"), None);

    let configured = dispatcher
        .begin_request(Some(Arc::clone(&configuration)), &OverridePayload::new())
        .unwrap();
    assert_eq!(configured.dispatch("fun1", vec![cart("hello")]).await.unwrap(), Value::Integer(5));
    assert_eq!(configured.owner("fun1"), Some(Scope::Configuration));

    let overridden = dispatcher
        .begin_request(Some(configuration), &request_payload)
        .unwrap();
    assert_eq!(overridden.dispatch("fun1", vec![cart("hello")]).await.unwrap(), Value::Integer(10));
    assert_eq!(overridden.owner("fun1"), Some(Scope::Request));
}

#[tokio::test]
async fn undeclared_names_are_rejected() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);

    let err = dispatcher
        .begin_request(None, &OverridePayload::new().with("fun2", "1"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::UndeclaredExtensionPoint { name } if name == "fun2"));

    let request = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();
    let err = request.dispatch("fun2", vec![]).await.unwrap_err();
    assert!(matches!(err, DispatchError::UndeclaredExtensionPoint { name } if name == "fun2"));

    let err = dispatcher
        .configuration("cfg", &OverridePayload::new().with("fun2", "1"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::UndeclaredExtensionPoint { .. }));
    assert_eq!(dispatcher.cached_configurations(), 0);
}

#[tokio::test]
async fn arity_is_checked_before_resolution() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);
    let request = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();

    let err = request.dispatch("sum", vec![Value::Integer(1)]).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::ArityMismatch { expected: 2, actual: 1, .. }
    ));
    assert_eq!(
        request
            .dispatch("sum", vec![Value::Integer(1), Value::Integer(2)])
            .await
            .unwrap(),
        Value::Integer(3)
    );
}

#[tokio::test]
async fn host_default_sees_live_state() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);
    let request = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();
    assert_eq!(request.dispatch("discount", vec![]).await.unwrap(), Value::Integer(10));
}

#[tokio::test]
async fn read_only_override_cannot_write() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);

    let reader = OverridePayload::new().with("discount", r#"state_read("cart/total") * 2"#);
    let request = dispatcher.begin_request(None, &reader).unwrap();
    assert_eq!(request.dispatch("discount", vec![]).await.unwrap(), Value::Integer(20));

    let writer = OverridePayload::new().with("discount", r#"state_write("cart/total", 0); 0"#);
    let request = dispatcher.begin_request(None, &writer).unwrap();
    let err = request.dispatch("discount", vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Faulted { kind: FaultKind::StateDenied, .. }
    ));

    let snooper = OverridePayload::new().with("discount", r#"state_read("secret")"#);
    let request = dispatcher.begin_request(None, &snooper).unwrap();
    let err = request.dispatch("discount", vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Faulted { kind: FaultKind::StateDenied, .. }
    ));

    assert_eq!(
        dispatcher.state().get(&path!("cart/total")),
        Some(Value::Integer(10))
    );
}

#[tokio::test]
async fn private_copy_writes_are_discarded() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);
    let payload = OverridePayload::new().with(
        "scratch",
        r#"state_write("cart/total", state_read("cart/total") + 5); state_read("cart/total")"#,
    );

    for _ in 0..2 {
        let request = dispatcher.begin_request(None, &payload).unwrap();
        assert_eq!(request.dispatch("scratch", vec![]).await.unwrap(), Value::Integer(15));
    }
    assert_eq!(
        dispatcher.state().get(&path!("cart/total")),
        Some(Value::Integer(10))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_faulty_override_does_not_disturb_others() {
    let dispatcher = dispatcher(OverridePayload::new(), 4);
    let payloads = [
        "input.a.len()",
        r#"throw "broken""#,
        "let x = 0; loop { x += 1; }",
        "input.a.len()",
        "input.a.len()",
        "input.a.len()",
    ];

    let mut handles = Vec::new();
    for source in payloads {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let request = dispatcher
                .begin_request(None, &OverridePayload::new().with("fun1", source))
                .unwrap();
            request.dispatch("fun1", vec![cart("hello")]).await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert!(matches!(
        &results[1],
        Err(DispatchError::Faulted { kind: FaultKind::Thrown, message, .. }) if message == "broken"
    ));
    assert!(matches!(&results[2], Err(DispatchError::Timeout { .. })));
    for i in [0usize, 3, 4, 5] {
        assert_eq!(results[i].as_ref().unwrap(), &Value::Integer(5));
    }
}

#[tokio::test]
async fn runaway_override_is_bounded_and_unit_reused() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);
    let request = dispatcher
        .begin_request(None, &OverridePayload::new().with("fun1", "loop {}"))
        .unwrap();

    let started = Instant::now();
    let err = request.dispatch("fun1", vec![Value::Null]).await.unwrap_err();
    assert!(matches!(err, DispatchError::Timeout { deadline, .. } if deadline == Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_millis(100 + 200 + 500));

    let request = dispatcher
        .begin_request(None, &OverridePayload::new().with("fun1", "7"))
        .unwrap();
    assert_eq!(request.dispatch("fun1", vec![Value::Null]).await.unwrap(), Value::Integer(7));
    assert_eq!(dispatcher.sandbox().spawned_units(), 1);
    assert_eq!(dispatcher.stats().retired_units, 0);
}

#[tokio::test]
async fn depth_and_compile_failures_are_scoped_to_the_call() {
    let dispatcher = dispatcher(OverridePayload::new(), 1);

    let recursion = OverridePayload::new().with("fun1", "fn f(n) { f(n + 1) } f(0)");
    let request = dispatcher.begin_request(None, &recursion).unwrap();
    let err = request.dispatch("fun1", vec![Value::Null]).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::ResourceExceeded { resource: Resource::Depth, .. }
    ));

    let broken = OverridePayload::new().with("fun1", "let = ;");
    let request = dispatcher.begin_request(None, &broken).unwrap();
    let err = request.dispatch("fun1", vec![Value::Null]).await.unwrap_err();
    assert!(matches!(err, DispatchError::Compile { ref name, .. } if name == "fun1"));
    assert!(err.is_override_failure());

    // A later request without the override still reaches the host default.
    let request = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();
    assert_eq!(request.dispatch("fun1", vec![Value::Null]).await.unwrap(), Value::Integer(42));
}

#[tokio::test]
async fn pure_override_is_idempotent() {
    let dispatcher = dispatcher(OverridePayload::new(), 2);
    let payload = OverridePayload::new().with("fun1", "input.a.len() * 3");

    let first = dispatcher.begin_request(None, &payload).unwrap();
    let second = dispatcher.begin_request(None, &payload).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(
        first.dispatch("fun1", vec![cart("abcd")]).await.unwrap(),
        second.dispatch("fun1", vec![cart("abcd")]).await.unwrap()
    );
    assert_eq!(dispatcher.stats().cache_hits, 1);
}
