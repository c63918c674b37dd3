//! Task payload shaping
//!
//! Tasks arrive as `{id, name, input: {script, ...}}`. Reports mirror the same
//! envelope with `input.script` replaced by `input.script_output`, so the
//! orchestrator gets back everything it sent except the script itself.

use actuator::{ActionScript, ExecutionResult, ScriptError};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Per-action entry in `script_output.results`
#[derive(Debug, Serialize)]
struct ResultEntry<'a> {
    action: &'a str,
    status: actuator::ActionStatus,
    details: &'a str,
}

/// Pull the script out of `input.script`. The script may be inline JSON or a
/// string holding JSON.
pub fn extract_script(payload: &Value) -> Result<ActionScript, ScriptError> {
    let script = payload
        .get("input")
        .and_then(|input| input.get("script"))
        .ok_or_else(|| ScriptError::Payload("missing input.script".to_string()))?;
    match script {
        Value::Object(_) => ActionScript::from_value(script.clone()),
        Value::String(text) => ActionScript::from_json_str(text),
        other => Err(ScriptError::Payload(format!(
            "input.script must be an object or a JSON string, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `script_output` for a completed run
pub fn script_output(result: &ExecutionResult) -> Value {
    let results: Vec<ResultEntry<'_>> = result
        .results
        .iter()
        .map(|r| ResultEntry {
            action: &r.action_kind,
            status: r.status,
            details: &r.details,
        })
        .collect();
    let mut output = json!({
        "success": result.success,
        "results": results,
    });
    if let Some(error) = &result.error {
        output["error"] = json!(error);
    }
    output
}

/// Copy the envelope, replacing `input.script` with `input.script_output`
pub fn mirror_with_output(payload: &Value, script_output: Value) -> Value {
    let mut envelope = match payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let mut input = match envelope.remove("input") {
        Some(Value::Object(input)) => input,
        _ => Map::new(),
    };
    input.remove("script");
    input.insert("script_output".to_string(), script_output);
    envelope.insert("input".to_string(), Value::Object(input));
    Value::Object(envelope)
}

/// Success report body
pub fn success_output(payload: &Value, result: &ExecutionResult) -> Value {
    mirror_with_output(payload, script_output(result))
}

/// Failure cause: the mirrored envelope carrying the error kind and message
pub fn failure_cause(payload: &Value, kind: &str, message: &str) -> Value {
    mirror_with_output(
        payload,
        json!({
            "success": false,
            "error": kind,
            "details": message,
        }),
    )
}
