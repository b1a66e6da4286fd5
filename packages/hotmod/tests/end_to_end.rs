//! A checkout flow served with overrides at every scope.

use std::sync::Arc;

use hotmod::{
    host_fn, path, Capability, DispatchError, Dispatcher, ExtensionPoint, FaultKind, HostError,
    Manifest, OverridePayload, ProtectedState, Scope, Value,
};

fn checkout() -> Dispatcher {
    let manifest = Manifest::from_points([
        ExtensionPoint::new("price", 1).with_state(Capability::read_only([path!("rates")])),
        ExtensionPoint::new("banner", 0),
    ])
    .unwrap();
    let state = ProtectedState::new(Value::Map(
        [(
            "rates".to_string(),
            Value::Map([("tax".to_string(), Value::Integer(2))].into_iter().collect()),
        )]
        .into_iter()
        .collect(),
    ));

    Dispatcher::builder()
        .manifest(manifest)
        .state(Arc::new(state))
        .host(
            "price",
            |args: &[Value], state: &ProtectedState| -> Result<Value, HostError> {
                let base = args[0].as_i64().unwrap_or(0);
                let tax = state
                    .get(&path!("rates/tax"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                Ok(Value::Integer(base + tax))
            },
        )
        .host("banner", host_fn(|_| Ok(Value::from("welcome"))))
        .service(OverridePayload::new().with("banner", r#""spring sale""#))
        .build()
        .unwrap()
}

#[tokio::test]
async fn requests_see_their_own_layers() {
    let dispatcher = checkout();
    let experiment = dispatcher
        .configuration(
            "experiment-b",
            &OverridePayload::new().with("price", r#"input * 2 + state_read("rates/tax")"#),
        )
        .unwrap();

    let control = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();
    let treated = dispatcher
        .begin_request(Some(Arc::clone(&experiment)), &OverridePayload::new())
        .unwrap();
    let debugging = dispatcher
        .begin_request(
            Some(experiment),
            &OverridePayload::new().with("banner", r#""debug""#),
        )
        .unwrap();

    let args = || vec![Value::Integer(10)];
    assert_eq!(control.dispatch("price", args()).await.unwrap(), Value::Integer(12));
    assert_eq!(treated.dispatch("price", args()).await.unwrap(), Value::Integer(22));
    assert_eq!(debugging.dispatch("price", args()).await.unwrap(), Value::Integer(22));

    assert_eq!(control.dispatch("banner", vec![]).await.unwrap(), Value::from("spring sale"));
    assert_eq!(debugging.dispatch("banner", vec![]).await.unwrap(), Value::from("debug"));
    assert_eq!(debugging.owner("banner"), Some(Scope::Request));
    assert_eq!(treated.owner("price"), Some(Scope::Configuration));
}

#[tokio::test]
async fn broken_fragment_fails_only_its_request() {
    let dispatcher = checkout();
    let broken = dispatcher
        .begin_request(
            None,
            &OverridePayload::new().with("price", "input.no_such_method()"),
        )
        .unwrap();
    let healthy = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();

    let err = broken.dispatch("price", vec![Value::Integer(1)]).await.unwrap_err();
    assert!(matches!(err, DispatchError::Faulted { kind: FaultKind::Reference, .. }));
    assert_eq!(
        healthy.dispatch("price", vec![Value::Integer(1)]).await.unwrap(),
        Value::Integer(3)
    );
    assert_eq!(
        dispatcher.state().get(&path!("rates/tax")),
        Some(Value::Integer(2))
    );
}

#[tokio::test]
async fn graduated_banner_becomes_host_code() {
    let dispatcher = checkout();
    let live = dispatcher.fragment_source("banner").unwrap().unwrap();
    assert_eq!(live.source, r#""spring sale""#);

    dispatcher
        .graduate("banner", host_fn(|_| Ok(Value::from("spring sale"))))
        .unwrap();
    let request = dispatcher.begin_request(None, &OverridePayload::new()).unwrap();
    assert_eq!(request.owner("banner"), None);
    assert_eq!(request.dispatch("banner", vec![]).await.unwrap(), Value::from("spring sale"));
}
