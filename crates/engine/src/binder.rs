//! # Parameter binding
//!
//! Turns the input bindings declared on a step into concrete values that match an
//! action's parameter schema, then hands those values to the action.
//!
//! Resolution walks the *schema*, not the declared inputs: every parameter is looked
//! up by name among the declared inputs; unmatched parameters fall back to their
//! default, fail when required, or are left out. Declared inputs that match no
//! parameter are ignored.
//!
//! Leaf actions receive values through their input setters. Workflow-kind actions
//! receive them as `inputs` of the child context they run in.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tracing::debug;

use crate::{
    context::ExecutionContext,
    error::EngineError,
    evaluator::ExpressionEvaluator,
    model::{ActionKind, ActionMeta, ParameterType, ValueBinding, ValueSource},
    registry::Action,
};

const TICKS_PER_SECOND: i64 = 10_000_000;
const TICKS_PER_MINUTE: i64 = 60 * TICKS_PER_SECOND;
const TICKS_PER_HOUR: i64 = 60 * TICKS_PER_MINUTE;
const TICKS_PER_DAY: i64 = 24 * TICKS_PER_HOUR;

/// Resolves the value of a binding against the context.
///
/// Literals are returned as-is; expressions go through the [`ExpressionEvaluator`]
/// service registered on the context chain.
pub fn evaluate_binding(binding: &ValueBinding, context: &ExecutionContext) -> Result<Value, EngineError> {
    match &binding.source {
        ValueSource::Literal(value) => Ok(value.clone()),
        ValueSource::Expression(expression) => {
            let evaluator = context
                .get_service::<dyn ExpressionEvaluator>()
                .ok_or(EngineError::MissingService("ExpressionEvaluator"))?;
            evaluator.evaluate(expression, context).map_err(|error| EngineError::Expression {
                expression: expression.clone(),
                reason: format!("{error:#}"),
            })
        }
    }
}

/// Resolves every parameter of `meta` against the declared input bindings.
///
/// The result keeps schema order. The first declared binding with a matching name
/// wins. Errors name the schema parameter that could not be satisfied.
pub fn resolve_inputs(
    meta: &ActionMeta,
    declared: &[ValueBinding],
    context: &ExecutionContext,
) -> Result<IndexMap<String, Value>, EngineError> {
    let mut values = IndexMap::with_capacity(meta.parameters.len());
    for parameter in &meta.parameters {
        let raw = match declared.iter().find(|binding| binding.name == parameter.name) {
            Some(binding) => evaluate_binding(binding, context)?,
            None => match &parameter.default {
                Some(default) => default.clone(),
                None if parameter.required => {
                    return Err(EngineError::MissingParameter {
                        parameter: parameter.name.clone(),
                    });
                }
                None => continue,
            },
        };
        let value = coerce_value(&parameter.name, raw, parameter.ty)?;
        values.insert(parameter.name.clone(), value);
    }
    Ok(values)
}

/// Hands resolved values to their target.
///
/// For [`ActionKind::Action`] every value is injected into the action's input slot
/// (the parameter alias, or its name). For [`ActionKind::Workflow`] every value is
/// written into `context.inputs`; `context` must be the child context the workflow
/// runs in.
pub fn apply_inputs(
    meta: &ActionMeta,
    values: &IndexMap<String, Value>,
    action: &mut dyn Action,
    context: &ExecutionContext,
) -> Result<(), EngineError> {
    match meta.kind {
        ActionKind::Workflow => {
            for (name, value) in values {
                context.set_input(name.clone(), value.clone());
            }
        }
        ActionKind::Action => {
            for (name, value) in values {
                let parameter = meta.parameter(name);
                let slot = parameter.map(|parameter| parameter.slot()).unwrap_or(name);
                let bound = action.bind_input(slot, value.clone()).map_err(|error| EngineError::TypeCoercion {
                    parameter: name.clone(),
                    expected: parameter.map(|parameter| parameter.ty).unwrap_or_default(),
                    reason: format!("{error:#}"),
                })?;
                if !bound {
                    debug!(action_ref = %meta.action_ref, slot, "action has no input slot for parameter");
                }
            }
        }
    }
    Ok(())
}

/// Converts `value` to the representation of `ty`.
///
/// Integers round floats half-to-even. Decimals are carried as strings so no
/// precision is lost. Date-times are normalised to RFC 3339 and time spans to
/// `[-][d.]hh:mm:ss[.fffffff]`. Arrays and objects are never converted, only
/// checked. `null` stays `null` for string, array, object and any; value types
/// reject it.
pub fn coerce_value(parameter: &str, value: Value, ty: ParameterType) -> Result<Value, EngineError> {
    let failure = |reason: String| EngineError::TypeCoercion {
        parameter: parameter.to_string(),
        expected: ty,
        reason,
    };
    if value.is_null() {
        return match ty {
            ParameterType::String | ParameterType::Array | ParameterType::Object | ParameterType::Any => Ok(Value::Null),
            _ => Err(failure("null is not a valid value".to_string())),
        };
    }
    match ty {
        ParameterType::Any => Ok(value),
        ParameterType::Array => match value {
            Value::Array(_) => Ok(value),
            other => Err(failure(format!("expected an array, got {}", describe(&other)))),
        },
        ParameterType::Object => match value {
            Value::Object(_) => Ok(value),
            other => Err(failure(format!("expected an object, got {}", describe(&other)))),
        },
        ParameterType::String => Ok(Value::String(match value {
            Value::String(text) => text,
            other => other.to_string(),
        })),
        ParameterType::Int => to_int(&value).map(Value::from).map_err(failure),
        ParameterType::Double => to_float(&value).and_then(float_value).map_err(failure),
        ParameterType::Float => to_float(&value)
            .and_then(|number| float_value(f64::from(number as f32)))
            .map_err(failure),
        ParameterType::Bool => to_bool(&value).map(Value::Bool).map_err(failure),
        ParameterType::Decimal => to_decimal(&value).map(|decimal| Value::String(decimal.to_string())).map_err(failure),
        ParameterType::DateTime => to_datetime(&value).map(Value::String).map_err(failure),
        ParameterType::TimeSpan => to_timespan(&value).map(|ticks| Value::String(format_timespan(ticks))).map_err(failure),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn to_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(int);
            }
            let float = number.as_f64().ok_or_else(|| format!("{number} is out of range"))?;
            round_to_int(float)
        }
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<i64>().map_err(|error| format!("'{trimmed}' is not an integer: {error}"))
        }
        Value::Bool(flag) => Ok(i64::from(*flag)),
        other => Err(format!("{} cannot be converted", describe(other))),
    }
}

fn round_to_int(float: f64) -> Result<i64, String> {
    let rounded = float.round_ties_even();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(format!("{float} is out of range"));
    }
    Ok(rounded as i64)
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(|| format!("{number} is out of range")),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<f64>().map_err(|error| format!("'{trimmed}' is not a number: {error}"))
        }
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        other => Err(format!("{} cannot be converted", describe(other))),
    }
}

fn float_value(number: f64) -> Result<Value, String> {
    Number::from_f64(number)
        .map(Value::Number)
        .ok_or_else(|| format!("{number} has no JSON representation"))
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("'{other}' is not a boolean")),
        },
        other => Err(format!("{} cannot be converted", describe(other))),
    }
}

fn to_decimal(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Number(number) => parse_decimal(&number.to_string()),
        Value::String(text) => parse_decimal(text.trim()),
        Value::Bool(flag) => Ok(Decimal::from(u8::from(*flag))),
        other => Err(format!("{} cannot be converted", describe(other))),
    }
}

fn parse_decimal(text: &str) -> Result<Decimal, String> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|error| format!("'{text}' is not a decimal: {error}"))
}

fn to_datetime(value: &Value) -> Result<String, String> {
    let Value::String(text) = value else {
        return Err(format!("{} cannot be converted", describe(value)));
    };
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.to_rfc3339());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.and_utc().to_rfc3339());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().to_rfc3339())
        .ok_or_else(|| format!("'{trimmed}' is not a recognised date-time"))
}

fn to_timespan(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => {
            let seconds = number.as_f64().ok_or_else(|| format!("{number} is out of range"))?;
            seconds_to_ticks(seconds)
        }
        Value::String(text) => parse_timespan(text.trim()).ok_or_else(|| format!("'{}' is not a time span", text.trim())),
        other => Err(format!("{} cannot be converted", describe(other))),
    }
}

fn seconds_to_ticks(seconds: f64) -> Result<i64, String> {
    let ticks = (seconds * TICKS_PER_SECOND as f64).round();
    if !ticks.is_finite() || ticks.abs() >= i64::MAX as f64 {
        return Err(format!("{seconds}s is out of range"));
    }
    Ok(ticks as i64)
}

/// Parses `[-][d.]hh:mm[:ss[.fff]]`, bare seconds, or `N` followed by `s`, `m` or `h`.
fn parse_timespan(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };
    if body.is_empty() {
        return None;
    }
    let ticks = if body.contains(':') {
        parse_clock(body)?
    } else {
        let (number, unit) = match body.char_indices().last()? {
            (index, 's') => (&body[..index], 1.0),
            (index, 'm') => (&body[..index], 60.0),
            (index, 'h') => (&body[..index], 3600.0),
            _ => (body, 1.0),
        };
        let seconds = number.trim().parse::<f64>().ok().filter(|seconds| *seconds >= 0.0)?;
        seconds_to_ticks(seconds * unit).ok()?
    };
    Some(if negative { -ticks } else { ticks })
}

fn parse_clock(body: &str) -> Option<i64> {
    let mut fields = body.split(':');
    let first = fields.next()?;
    let (days, hours) = match first.split_once('.') {
        Some((days, hours)) => (days.parse::<i64>().ok()?, hours.parse::<i64>().ok()?),
        None => (0, first.parse::<i64>().ok()?),
    };
    let minutes = fields.next()?.parse::<i64>().ok()?;
    let seconds = match fields.next() {
        Some(seconds) => seconds.parse::<f64>().ok()?,
        None => 0.0,
    };
    if fields.next().is_some() || days < 0 || !(0..24).contains(&hours) || !(0..60).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let whole = days
        .checked_mul(TICKS_PER_DAY)?
        .checked_add(hours * TICKS_PER_HOUR)?
        .checked_add(minutes * TICKS_PER_MINUTE)?;
    whole.checked_add((seconds * TICKS_PER_SECOND as f64).round() as i64)
}

fn format_timespan(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let ticks = ticks.unsigned_abs();
    let days = ticks / TICKS_PER_DAY as u64;
    let hours = ticks % TICKS_PER_DAY as u64 / TICKS_PER_HOUR as u64;
    let minutes = ticks % TICKS_PER_HOUR as u64 / TICKS_PER_MINUTE as u64;
    let seconds = ticks % TICKS_PER_MINUTE as u64 / TICKS_PER_SECOND as u64;
    let fraction = ticks % TICKS_PER_SECOND as u64;

    let mut formatted = String::from(sign);
    if days > 0 {
        formatted.push_str(&format!("{days}."));
    }
    formatted.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if fraction > 0 {
        formatted.push_str(&format!(".{fraction:07}"));
    }
    formatted
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::{
        evaluator::PathEvaluator,
        model::{ParameterSpec, parse_value},
        registry::InputSetters,
    };

    fn evaluating_context() -> ExecutionContext {
        let context = ExecutionContext::new();
        context.register_service::<dyn ExpressionEvaluator>(Rc::new(PathEvaluator));
        context
    }

    #[test]
    fn missing_required_parameter_names_the_schema_parameter() {
        let meta = ActionMeta::action("deploy", vec![ParameterSpec::new("p", ParameterType::String).required()]);
        let declared = vec![parse_value("other", &json!("x"))];
        let error = resolve_inputs(&meta, &declared, &ExecutionContext::new()).unwrap_err();
        assert!(matches!(&error, EngineError::MissingParameter { parameter } if parameter == "p"));
        assert!(error.to_string().contains("'p'"));
    }

    #[test]
    fn defaults_are_coerced_to_the_declared_type() {
        let meta = ActionMeta::action(
            "deploy",
            vec![
                ParameterSpec::new("count", ParameterType::Int).with_default(json!("42")),
                ParameterSpec::new("ratio", ParameterType::Double).with_default(json!(1)),
            ],
        );
        let values = resolve_inputs(&meta, &[], &ExecutionContext::new()).unwrap();
        assert_eq!(values["count"], json!(42));
        assert_eq!(values["ratio"], json!(1.0));
    }

    #[test]
    fn optional_parameters_without_default_are_omitted() {
        let meta = ActionMeta::action("deploy", vec![ParameterSpec::new("note", ParameterType::String)]);
        let values = resolve_inputs(&meta, &[], &ExecutionContext::new()).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn declared_values_win_over_defaults_and_expressions_are_evaluated() {
        let meta = ActionMeta::action(
            "deploy",
            vec![
                ParameterSpec::new("count", ParameterType::Int).with_default(json!(1)),
                ParameterSpec::new("region", ParameterType::String),
            ],
        );
        let context = evaluating_context();
        context.set_var("settings", json!({"region": "eu"}));
        let declared = vec![parse_value("count", &json!(2.5)), parse_value("region", &json!("${settings.region}"))];
        let values = resolve_inputs(&meta, &declared, &context).unwrap();
        assert_eq!(values["count"], json!(2));
        assert_eq!(values["region"], json!("eu"));
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["count", "region"]);
    }

    #[test]
    fn expressions_without_an_evaluator_are_a_missing_service() {
        let meta = ActionMeta::action("deploy", vec![ParameterSpec::new("region", ParameterType::Any)]);
        let declared = vec![parse_value("region", &json!("${settings.region}"))];
        let error = resolve_inputs(&meta, &declared, &ExecutionContext::new()).unwrap_err();
        assert!(matches!(error, EngineError::MissingService("ExpressionEvaluator")));
    }

    #[test]
    fn conversion_failure_fails_the_binding() {
        let meta = ActionMeta::action("deploy", vec![ParameterSpec::new("count", ParameterType::Int)]);
        let declared = vec![parse_value("count", &json!("many"))];
        let error = resolve_inputs(&meta, &declared, &ExecutionContext::new()).unwrap_err();
        assert!(matches!(error, EngineError::TypeCoercion { expected: ParameterType::Int, .. }));
    }

    #[test]
    fn arrays_and_objects_must_already_have_their_shape() {
        let meta = ActionMeta::workflow(
            "nightly",
            vec![
                ParameterSpec::new("items", ParameterType::Array),
                ParameterSpec::new("cfg", ParameterType::Object),
            ],
        );
        let context = ExecutionContext::new();

        let error = resolve_inputs(&meta, &[parse_value("items", &json!("not-a-list"))], &context).unwrap_err();
        assert!(matches!(error, EngineError::TypeCoercion { expected: ParameterType::Array, .. }));
        let error = resolve_inputs(&meta, &[parse_value("cfg", &json!(42))], &context).unwrap_err();
        assert!(matches!(error, EngineError::TypeCoercion { expected: ParameterType::Object, .. }));

        let declared = vec![parse_value("items", &json!([1, 2])), parse_value("cfg", &json!({"a": 1}))];
        let values = resolve_inputs(&meta, &declared, &context).unwrap();
        assert_eq!(values["items"], json!([1, 2]));
        assert_eq!(values["cfg"], json!({"a": 1}));

        assert_eq!(coerce_value("items", json!(null), ParameterType::Array).unwrap(), json!(null));
        assert_eq!(coerce_value("cfg", json!(null), ParameterType::Object).unwrap(), json!(null));
        assert!(coerce_value("cfg", json!([1]), ParameterType::Object).is_err());
    }

    #[test]
    fn integer_coercion_rounds_half_to_even() {
        assert_eq!(coerce_value("n", json!(2.5), ParameterType::Int).unwrap(), json!(2));
        assert_eq!(coerce_value("n", json!(3.5), ParameterType::Int).unwrap(), json!(4));
        assert_eq!(coerce_value("n", json!(" 17 "), ParameterType::Int).unwrap(), json!(17));
        assert_eq!(coerce_value("n", json!(true), ParameterType::Int).unwrap(), json!(1));
        assert!(coerce_value("n", json!(null), ParameterType::Int).is_err());
        assert!(coerce_value("n", json!([1]), ParameterType::Int).is_err());
    }

    #[test]
    fn string_bool_and_float_coercions() {
        assert_eq!(coerce_value("s", json!(12), ParameterType::String).unwrap(), json!("12"));
        assert_eq!(coerce_value("s", json!(null), ParameterType::String).unwrap(), json!(null));
        assert_eq!(coerce_value("b", json!(" TRUE "), ParameterType::Bool).unwrap(), json!(true));
        assert_eq!(coerce_value("b", json!(0), ParameterType::Bool).unwrap(), json!(false));
        assert!(coerce_value("b", json!("yes"), ParameterType::Bool).is_err());
        assert_eq!(coerce_value("f", json!("1.5"), ParameterType::Float).unwrap(), json!(1.5));
        assert_eq!(coerce_value("d", json!("2.25"), ParameterType::Double).unwrap(), json!(2.25));
    }

    #[test]
    fn decimal_and_datetime_coercions() {
        assert_eq!(coerce_value("m", json!("19.990"), ParameterType::Decimal).unwrap(), json!("19.990"));
        assert_eq!(coerce_value("m", json!(7), ParameterType::Decimal).unwrap(), json!("7"));
        assert!(coerce_value("m", json!("abc"), ParameterType::Decimal).is_err());

        assert_eq!(
            coerce_value("t", json!("2024-03-01 10:30:00"), ParameterType::DateTime).unwrap(),
            json!("2024-03-01T10:30:00+00:00")
        );
        assert_eq!(coerce_value("t", json!("2024-03-01"), ParameterType::DateTime).unwrap(), json!("2024-03-01T00:00:00+00:00"));
        assert_eq!(
            coerce_value("t", json!("2024-03-01T10:30:00+02:00"), ParameterType::DateTime).unwrap(),
            json!("2024-03-01T10:30:00+02:00")
        );
        assert!(coerce_value("t", json!("yesterday"), ParameterType::DateTime).is_err());
    }

    #[test]
    fn timespan_coercion_normalises_formats() {
        let span = |raw: Value| coerce_value("d", raw, ParameterType::TimeSpan);
        assert_eq!(span(json!("01:30:00")).unwrap(), json!("01:30:00"));
        assert_eq!(span(json!("2.03:04:05")).unwrap(), json!("2.03:04:05"));
        assert_eq!(span(json!("00:00:01.5")).unwrap(), json!("00:00:01.5000000"));
        assert_eq!(span(json!("-00:10")).unwrap(), json!("-00:10:00"));
        assert_eq!(span(json!("90")).unwrap(), json!("00:01:30"));
        assert_eq!(span(json!("5m")).unwrap(), json!("00:05:00"));
        assert_eq!(span(json!("36h")).unwrap(), json!("1.12:00:00"));
        assert_eq!(span(json!(45)).unwrap(), json!("00:00:45"));
        assert!(span(json!("25:00:00")).is_err());
        assert!(span(json!("soon")).is_err());
    }

    #[derive(Default)]
    struct Deploy {
        region: String,
        replicas: i64,
    }

    impl Action for Deploy {
        fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<crate::model::ActionResult> {
            Ok(crate::model::ActionResult::success(json!({"region": self.region, "replicas": self.replicas})))
        }
    }

    #[test]
    fn leaf_actions_receive_values_through_their_slots() {
        let meta = ActionMeta::action(
            "deploy",
            vec![
                ParameterSpec::new("Region", ParameterType::String).with_alias("region"),
                ParameterSpec::new("replicas", ParameterType::Int),
            ],
        );
        let setters = InputSetters::<Deploy>::new()
            .slot("region", |deploy, value| {
                deploy.region = serde_json::from_value(value)?;
                Ok(())
            })
            .slot("replicas", |deploy, value| {
                deploy.replicas = serde_json::from_value(value)?;
                Ok(())
            });
        let mut action = setters.bind(Deploy::default());
        let context = ExecutionContext::new();
        let values = IndexMap::from([("Region".to_string(), json!("eu")), ("replicas".to_string(), json!(3))]);
        apply_inputs(&meta, &values, &mut action, &context).unwrap();
        let result = action.exec(&context).unwrap();
        assert_eq!(result.result, json!({"region": "eu", "replicas": 3}));
        assert!(context.inputs().is_empty());
    }

    #[test]
    fn workflow_actions_receive_values_as_context_inputs() {
        let meta = ActionMeta::workflow("nightly", vec![ParameterSpec::new("day", ParameterType::String)]);
        let mut action = InputSetters::<Deploy>::new().bind(Deploy::default());
        let context = ExecutionContext::new();
        let values = IndexMap::from([("day".to_string(), json!("monday"))]);
        apply_inputs(&meta, &values, &mut action, &context).unwrap();
        assert_eq!(context.input("day"), Some(json!("monday")));
    }
}
