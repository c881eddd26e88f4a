//! JSON <-> JS value conversion.

use rquickjs::{Array, Ctx, IntoJs, Object, Value as JsValue};

/// Convert a serde_json value to a JS value.
pub(crate) fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    value: &serde_json::Value,
) -> rquickjs::Result<JsValue<'js>> {
    match value {
        serde_json::Value::Null => Ok(JsValue::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(JsValue::new_int(ctx.clone(), i))
            } else if let Some(f) = n.as_f64() {
                Ok(JsValue::new_float(ctx.clone(), f))
            } else {
                Ok(JsValue::new_null(ctx.clone()))
            }
        }
        serde_json::Value::String(s) => s.as_str().into_js(ctx),
        serde_json::Value::Array(items) => {
            let arr = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                arr.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(arr.into_value())
        }
        serde_json::Value::Object(map) => {
            let obj = Object::new(ctx.clone())?;
            for (key, item) in map {
                obj.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            Ok(obj.into_value())
        }
    }
}

/// Convert a JS value to a serde_json value. Functions and symbols
/// collapse to null.
pub(crate) fn js_to_json(value: &JsValue<'_>) -> rquickjs::Result<serde_json::Value> {
    if value.is_null() || value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(serde_json::Value::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(serde_json::json!(i));
    }
    if let Some(f) = value.as_float() {
        return Ok(serde_json::json!(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(serde_json::Value::String(s.to_string()?));
    }
    if let Some(arr) = value.as_array() {
        let mut items = Vec::with_capacity(arr.len());
        for i in 0..arr.len() {
            let item: JsValue<'_> = arr.get(i)?;
            items.push(js_to_json(&item)?);
        }
        return Ok(serde_json::Value::Array(items));
    }
    if let Some(obj) = value.as_object() {
        let mut map = serde_json::Map::new();
        for prop in obj.props::<String, JsValue<'_>>() {
            let (key, item) = prop?;
            map.insert(key, js_to_json(&item)?);
        }
        return Ok(serde_json::Value::Object(map));
    }
    Ok(serde_json::Value::Null)
}
