//! Backend-neutral model of values living in the debuggee.
//!
//! A [`RemoteValue`] is what either backend hands back from `evaluate`,
//! scope listings or property expansion. Primitives carry their value
//! directly. Objects carry an [`ObjectHandle`] that fetches own properties on
//! demand, one backend round trip per call; the children it returns are again
//! lazy.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bugs_runtime::Result;
use indexmap::IndexMap;
use serde_json::Value;

/// Own properties of an object, in the order the backend listed them.
pub type Properties = IndexMap<String, RemoteValue>;

pub type PropertiesFuture<'a> = Pin<Box<dyn Future<Output = Result<Properties>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
	String,
	Number,
	Boolean,
	Function,
	Object,
	Undefined,
	Null,
}

impl ValueKind {
	pub fn as_str(self) -> &'static str {
		match self {
			ValueKind::String => "string",
			ValueKind::Number => "number",
			ValueKind::Boolean => "boolean",
			ValueKind::Function => "function",
			ValueKind::Object => "object",
			ValueKind::Undefined => "undefined",
			ValueKind::Null => "null",
		}
	}
}

impl fmt::Display for ValueKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How to ask the backend for an object's own properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyQuery {
	/// V8 mirror property list: `(name, handle)` pairs resolved by one `lookup`.
	Refs(Vec<(String, u64)>),
	/// DevTools `objectId` resolved by one `Runtime.getProperties`.
	ObjectId(String),
}

/// Backend side of lazy expansion.
pub trait PropertySource: Send + Sync {
	fn own_properties<'a>(&'a self, query: &'a PropertyQuery) -> PropertiesFuture<'a>;
}

/// Lazy reference to a remote object.
#[derive(Clone)]
pub struct ObjectHandle {
	/// Backend identity of the object (V8 handle or DevTools objectId).
	pub id: String,
	pub query: PropertyQuery,
	source: Arc<dyn PropertySource>,
}

impl ObjectHandle {
	pub fn new(id: impl Into<String>, query: PropertyQuery, source: Arc<dyn PropertySource>) -> Self {
		Self {
			id: id.into(),
			query,
			source,
		}
	}

	/// Fetches own properties. Every call is a fresh round trip.
	pub async fn fetch(&self) -> Result<Properties> {
		self.source.own_properties(&self.query).await
	}
}

impl fmt::Debug for ObjectHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ObjectHandle")
			.field("id", &self.id)
			.field("query", &self.query)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone)]
pub struct RemoteValue {
	pub kind: ValueKind,
	pub class_name: String,
	/// Primitive value, or the text stub for functions.
	pub value: Option<Value>,
	/// Backend's own rendering of the value, when it sent one.
	pub description: Option<String>,
	handle: Option<ObjectHandle>,
}

impl RemoteValue {
	pub fn primitive(kind: ValueKind, class_name: impl Into<String>, value: Value) -> Self {
		Self {
			kind,
			class_name: class_name.into(),
			value: Some(value),
			description: None,
			handle: None,
		}
	}

	pub fn undefined() -> Self {
		Self {
			kind: ValueKind::Undefined,
			class_name: "undefined".to_string(),
			value: None,
			description: None,
			handle: None,
		}
	}

	pub fn null() -> Self {
		Self {
			kind: ValueKind::Null,
			class_name: "null".to_string(),
			value: Some(Value::Null),
			description: None,
			handle: None,
		}
	}

	pub fn function(class_name: impl Into<String>, name: &str) -> Self {
		Self::primitive(ValueKind::Function, class_name, Value::String(function_stub(name)))
	}

	pub fn object(class_name: impl Into<String>, handle: ObjectHandle) -> Self {
		Self {
			kind: ValueKind::Object,
			class_name: class_name.into(),
			value: None,
			description: None,
			handle: Some(handle),
		}
	}

	pub fn with_description(mut self, description: Option<String>) -> Self {
		self.description = description;
		self
	}

	/// Lazy expansion, present only for objects.
	pub fn expand(&self) -> Option<&ObjectHandle> {
		self.handle.as_ref()
	}

	pub fn is_object(&self) -> bool {
		self.kind == ValueKind::Object
	}
}

impl fmt::Display for RemoteValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (&self.kind, &self.value) {
			(ValueKind::Undefined, _) => f.write_str("undefined"),
			(ValueKind::Null, _) => f.write_str("null"),
			(ValueKind::Function, Some(Value::String(stub))) => f.write_str(stub),
			(ValueKind::Object, _) => match &self.description {
				Some(description) => f.write_str(description),
				None => write!(f, "{} {{...}}", self.class_name),
			},
			(_, Some(value)) => fmt_primitive(f, value),
			(_, None) => f.write_str(self.description.as_deref().unwrap_or("undefined")),
		}
	}
}

/// Text stub standing in for a function's source.
pub fn function_stub(name: &str) -> String {
	format!("function {name} () {{}}")
}

/// Fully resolved snapshot of a value, bounded in depth.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
	Primitive { kind: ValueKind, value: Value },
	Function { stub: String },
	Object { class_name: String, properties: IndexMap<String, Materialized> },
	/// Depth bound reached; the object was not fetched.
	Truncated { class_name: String },
	/// The object is one of its own ancestors.
	Circular { class_name: String },
}

impl Materialized {
	fn write(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
		match self {
			Materialized::Primitive { kind, value } => match kind {
				ValueKind::Undefined => f.write_str("undefined"),
				_ => fmt_primitive(f, value),
			},
			Materialized::Function { stub } => f.write_str(stub),
			Materialized::Truncated { class_name } => write!(f, "{class_name} {{...}}"),
			Materialized::Circular { class_name } => write!(f, "[Circular {class_name}]"),
			Materialized::Object { class_name, properties } if properties.is_empty() => {
				write!(f, "{class_name} {{}}")
			}
			Materialized::Object { class_name, properties } => {
				writeln!(f, "{class_name} {{")?;
				let pad = "  ".repeat(indent + 1);
				for (name, child) in properties {
					write!(f, "{pad}{name}: ")?;
					child.write(f, indent + 1)?;
					writeln!(f, ",")?;
				}
				write!(f, "{}}}", "  ".repeat(indent))
			}
		}
	}
}

impl fmt::Display for Materialized {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.write(f, 0)
	}
}

fn fmt_primitive(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
	match value {
		Value::String(s) => write!(f, "{s:?}"),
		other => write!(f, "{other}"),
	}
}
