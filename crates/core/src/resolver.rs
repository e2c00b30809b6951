//! Normalization of protocol values into [`RemoteValue`] and eager
//! materialization of object graphs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

use bugs_protocol::cdp::RemoteObject;
use bugs_protocol::v8::Mirror;
use bugs_runtime::Result;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::value::{
	Materialized, ObjectHandle, Properties, PropertyQuery, PropertySource, RemoteValue, ValueKind, function_stub,
};

/// Depth used by `inspect`.
pub const EAGER_DEPTH: usize = 3;

static MIRROR_CLASS_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#<(.+)>").unwrap());

static FUNCTION_NAME: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s*(?:async\s+)?(?:function\s*\*?|class)\s*([\w$]*)").unwrap());

/// Converts a V8 mirror into a [`RemoteValue`].
///
/// `{ "ref": N }` placeholders are resolved against `refs`, the mirror list
/// that came with the same response.
pub fn normalize_v8(mirror: &Mirror, refs: &[Mirror], source: &Arc<dyn PropertySource>) -> RemoteValue {
	let mirror = match mirror.reference {
		Some(handle) if mirror.is_reference_only() => match refs.iter().find(|m| m.handle == Some(handle)) {
			Some(resolved) => resolved,
			None => {
				tracing::debug!(handle, "unresolved mirror reference");
				return RemoteValue::undefined();
			}
		},
		_ => mirror,
	};

	let value = || mirror.value.clone().unwrap_or(Value::Null);
	match mirror.kind.as_str() {
		"undefined" => RemoteValue::undefined(),
		"null" => RemoteValue::null(),
		"string" => RemoteValue::primitive(ValueKind::String, "String", value()),
		"number" => RemoteValue::primitive(ValueKind::Number, "Number", value()),
		"boolean" => RemoteValue::primitive(ValueKind::Boolean, "Boolean", value()),
		"symbol" => RemoteValue::primitive(
			ValueKind::String,
			"Symbol",
			Value::String(mirror.text.clone().unwrap_or_else(|| "Symbol()".to_string())),
		),
		"function" => {
			let name = mirror
				.name
				.as_deref()
				.filter(|n| !n.is_empty())
				.or(mirror.inferred_name.as_deref())
				.unwrap_or("");
			RemoteValue::function(mirror.class_name.as_deref().unwrap_or("Function"), name)
				.with_description(mirror.text.clone())
		}
		_ => {
			let class_name = mirror
				.text
				.as_deref()
				.and_then(|text| MIRROR_CLASS_NAME.captures(text))
				.map(|caps| caps[1].to_string())
				.or_else(|| mirror.class_name.clone())
				.unwrap_or_else(|| "Object".to_string());

			let Some(handle) = mirror.handle else {
				return RemoteValue::primitive(ValueKind::Object, class_name, value());
			};
			let refs = mirror
				.properties
				.iter()
				.map(|p| (p.name.clone(), p.reference))
				.collect();
			RemoteValue::object(
				class_name,
				ObjectHandle::new(handle.to_string(), PropertyQuery::Refs(refs), Arc::clone(source)),
			)
			.with_description(mirror.text.clone())
		}
	}
}

/// Converts a DevTools `Runtime.RemoteObject` into a [`RemoteValue`].
pub fn normalize_cdp(object: &RemoteObject, source: &Arc<dyn PropertySource>) -> RemoteValue {
	let value = || {
		object
			.value
			.clone()
			.or_else(|| object.unserializable_value.clone().map(Value::String))
			.unwrap_or(Value::Null)
	};

	let value = match object.kind.as_str() {
		"undefined" => RemoteValue::undefined(),
		"string" => RemoteValue::primitive(ValueKind::String, "String", value()),
		"number" | "bigint" => RemoteValue::primitive(ValueKind::Number, "Number", value()),
		"boolean" => RemoteValue::primitive(ValueKind::Boolean, "Boolean", value()),
		"symbol" => RemoteValue::primitive(
			ValueKind::String,
			"Symbol",
			Value::String(object.description.clone().unwrap_or_else(|| "Symbol()".to_string())),
		),
		"function" => {
			let name = object
				.description
				.as_deref()
				.and_then(|d| FUNCTION_NAME.captures(d))
				.and_then(|caps| caps.get(1))
				.map_or("", |m| m.as_str());
			RemoteValue::function(object.class_name.as_deref().unwrap_or("Function"), name)
		}
		_ if object.subtype.as_deref() == Some("null") => RemoteValue::null(),
		_ => {
			let class_name = object.class_name.clone().unwrap_or_else(|| "Object".to_string());
			match &object.object_id {
				Some(id) => RemoteValue::object(
					class_name,
					ObjectHandle::new(id.clone(), PropertyQuery::ObjectId(id.clone()), Arc::clone(source)),
				),
				None => RemoteValue::primitive(ValueKind::Object, class_name, value()),
			}
		}
	};
	value.with_description(object.description.clone())
}

/// Resolves `value` into a [`Materialized`] tree at most `depth` objects deep.
///
/// Each distinct object is fetched at most once per call. An object that
/// reappears on its own ancestor path becomes [`Materialized::Circular`].
pub async fn materialize(value: &RemoteValue, depth: usize) -> Result<Materialized> {
	let mut walk = Walk::default();
	walk.visit(value, depth).await
}

#[derive(Default)]
struct Walk {
	arena: HashMap<String, Properties>,
	ancestors: Vec<String>,
}

impl Walk {
	fn visit<'a>(
		&'a mut self,
		value: &'a RemoteValue,
		depth: usize,
	) -> Pin<Box<dyn Future<Output = Result<Materialized>> + Send + 'a>> {
		Box::pin(async move {
			let Some(handle) = value.expand() else {
				return Ok(leaf(value));
			};
			let class_name = value.class_name.clone();

			if self.ancestors.contains(&handle.id) {
				return Ok(Materialized::Circular { class_name });
			}
			if depth == 0 {
				return Ok(Materialized::Truncated { class_name });
			}

			let properties = match self.arena.get(&handle.id) {
				Some(cached) => cached.clone(),
				None => {
					let fetched = handle.fetch().await?;
					self.arena.insert(handle.id.clone(), fetched.clone());
					fetched
				}
			};

			self.ancestors.push(handle.id.clone());
			let mut resolved = IndexMap::with_capacity(properties.len());
			for (name, child) in &properties {
				let child = self.visit(child, depth - 1).await?;
				resolved.insert(name.clone(), child);
			}
			self.ancestors.pop();

			Ok(Materialized::Object {
				class_name,
				properties: resolved,
			})
		})
	}
}

fn leaf(value: &RemoteValue) -> Materialized {
	match value.kind {
		ValueKind::Function => Materialized::Function {
			stub: value
				.value
				.as_ref()
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| function_stub("")),
		},
		kind => Materialized::Primitive {
			kind,
			value: value.value.clone().unwrap_or(Value::Null),
		},
	}
}
