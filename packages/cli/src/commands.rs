//! Subcommand implementations.
//!
//! - `dispatch` - run one extension point through the scope chain
//! - `check` - validate payloads against a manifest and compile them

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hotmod_core::{convert, Value};
use hotmod_dispatch::{Dispatcher, HostError, RuntimeConfig};
use hotmod_overrides::{Manifest, OverridePayload, OverrideSet, Scope};
use hotmod_sandbox::Sandbox;
use hotmod_state::ProtectedState;

/// Inputs for `hotmod dispatch`.
#[derive(Debug, Default)]
pub struct DispatchRequest {
    pub manifest: PathBuf,
    pub name: String,
    pub args: Vec<String>,
    pub service: Option<PathBuf>,
    pub configuration: Option<PathBuf>,
    pub configuration_id: String,
    pub request: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub defaults: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::from_file(path).with_context(|| format!("loading manifest {}", path.display()))
}

fn load_payload(path: Option<&Path>) -> Result<OverridePayload> {
    match path {
        Some(path) => OverridePayload::from_file(path)
            .with_context(|| format!("loading overrides {}", path.display())),
        None => Ok(OverridePayload::new()),
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading runtime config {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn load_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    convert::parse_json(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Host defaults for the command line: a fixed value from the defaults
/// file, otherwise the first argument echoed back.
fn load_defaults(path: Option<&Path>) -> Result<BTreeMap<String, Value>> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    match load_json(path)? {
        Value::Map(map) => Ok(map),
        other => bail!(
            "host defaults in {} must be a JSON object, found {}",
            path.display(),
            other.type_name()
        ),
    }
}

pub async fn dispatch(request: DispatchRequest) -> Result<String> {
    let manifest = load_manifest(&request.manifest)?;
    let mut defaults = load_defaults(request.defaults.as_deref())?;
    let state = match &request.state {
        Some(path) => load_json(path)?,
        None => Value::Map(BTreeMap::new()),
    };

    let mut builder = Dispatcher::builder()
        .state(Arc::new(ProtectedState::new(state)))
        .service(load_payload(request.service.as_deref())?)
        .config(load_config(request.config.as_deref())?);
    for point in manifest.points() {
        let fixed = defaults.remove(&point.name);
        builder = builder.host(
            point.name.clone(),
            move |args: &[Value], _: &ProtectedState| -> std::result::Result<Value, HostError> {
                Ok(match &fixed {
                    Some(value) => value.clone(),
                    None => args.first().cloned().unwrap_or(Value::Null),
                })
            },
        );
    }
    if let Some(name) = defaults.keys().next() {
        bail!("host default given for undeclared extension point {name}");
    }
    let dispatcher = builder.manifest(manifest).build()?;

    let configuration = match &request.configuration {
        Some(path) => {
            let payload = load_payload(Some(path))?;
            Some(dispatcher.configuration(&request.configuration_id, &payload)?)
        }
        None => None,
    };
    let context =
        dispatcher.begin_request(configuration, &load_payload(request.request.as_deref())?)?;

    let args = request
        .args
        .iter()
        .map(|arg| convert::parse_json(arg).with_context(|| format!("argument {arg:?}")))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(request = %context.id(), owner = ?context.owner(&request.name), "dispatching");
    let value = context.dispatch(&request.name, args).await?;
    Ok(convert::to_json_string(&value))
}

/// Validate each payload against the manifest and compile its fragments.
///
/// Returns one report line per payload; fails if any payload is invalid.
pub fn check(manifest: &Path, payloads: &[PathBuf], config: Option<&Path>) -> Result<Vec<String>> {
    let manifest = load_manifest(manifest)?;
    let config = load_config(config)?;
    let sandbox = Sandbox::new(config.sandbox)?;

    let mut report = Vec::with_capacity(payloads.len());
    let mut failures = 0;
    for path in payloads {
        let outcome = load_payload(Some(path)).and_then(|payload| {
            let set = OverrideSet::from_payload(Scope::Service, &payload, &manifest)?;
            sandbox.precompile(&set)?;
            Ok(set)
        });
        match outcome {
            Ok(set) => report.push(format!(
                "ok {}: {} override(s), {}",
                path.display(),
                set.len(),
                set.tag()
            )),
            Err(e) => {
                failures += 1;
                report.push(format!("error {}: {e:#}", path.display()));
            }
        }
    }

    if failures > 0 {
        bail!("{}\n{failures} payload(s) failed", report.join("\n"));
    }
    Ok(report)
}
