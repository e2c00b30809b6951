//! Session-local breakpoint registry.
//!
//! Breakpoints can be set before the debugger is reachable. Each one gets a
//! [`BreakpointKey`] right away and a backend id once registered; until then
//! it waits in insertion order for the handshake to submit it.

use std::fmt;

use bugs_runtime::{Error, Result};
use indexmap::IndexMap;
use tokio::sync::oneshot;

use crate::backend::{BreakpointAck, BreakpointId};
use crate::location::{EditorLocation, SourceMapper};

/// Session-local breakpoint identity, stable from creation to removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointKey(pub u64);

impl fmt::Display for BreakpointKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Where to break, in editor terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
	pub path: String,
	/// 1-based.
	pub line: u32,
	pub condition: Option<String>,
}

impl BreakpointSpec {
	pub fn new(path: impl Into<String>, line: u32) -> Self {
		Self {
			path: path.into(),
			line,
			condition: None,
		}
	}

	pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
		self.condition = Some(condition.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
	pub key: BreakpointKey,
	pub spec: BreakpointSpec,
	/// Absent until the backend accepted it.
	pub protocol_id: Option<BreakpointId>,
	/// Where the backend actually placed it, if it moved.
	pub resolved: Option<EditorLocation>,
}

impl Breakpoint {
	pub fn is_registered(&self) -> bool {
		self.protocol_id.is_some()
	}
}

impl fmt::Display for Breakpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}] {}:{}", self.key, self.spec.path, self.spec.line)?;
		if let Some(condition) = &self.spec.condition {
			write!(f, " if {condition}")?;
		}
		match &self.protocol_id {
			Some(id) => write!(f, " (id {id})"),
			None => f.write_str(" (pending)"),
		}
	}
}

/// Resolves once the breakpoint has a backend id.
#[derive(Debug)]
pub struct PendingBreakpoint {
	pub key: BreakpointKey,
	rx: oneshot::Receiver<Result<Breakpoint>>,
}

impl PendingBreakpoint {
	/// # Errors
	///
	/// The backend's rejection, or [`Error::SessionClosed`] if the session
	/// ended first.
	pub async fn registered(self) -> Result<Breakpoint> {
		self.rx.await.map_err(|_| Error::SessionClosed)?
	}
}

/// A breakpoint handed out for submission.
#[derive(Debug, Clone)]
pub(crate) struct Submission {
	pub key: BreakpointKey,
	pub spec: BreakpointSpec,
}

/// When to tell waiters about a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notify {
	Now,
	/// Held until [`BreakpointRegistry::go_live`].
	Deferred,
}

struct Entry {
	breakpoint: Breakpoint,
	submitting: bool,
	waiters: Vec<oneshot::Sender<Result<Breakpoint>>>,
	deferred: bool,
}

#[derive(Default)]
pub(crate) struct BreakpointRegistry {
	next_key: u64,
	entries: IndexMap<BreakpointKey, Entry>,
	/// Set once the session runs; later additions are submitted directly.
	live: bool,
}

impl BreakpointRegistry {
	/// Records a breakpoint. Returns a submission when the caller must send
	/// it now (the session is live).
	pub fn add(&mut self, spec: BreakpointSpec) -> (PendingBreakpoint, Option<Submission>) {
		self.next_key += 1;
		let key = BreakpointKey(self.next_key);
		let (tx, rx) = oneshot::channel();

		let submission = self.live.then(|| Submission {
			key,
			spec: spec.clone(),
		});
		self.entries.insert(
			key,
			Entry {
				breakpoint: Breakpoint {
					key,
					spec,
					protocol_id: None,
					resolved: None,
				},
				submitting: submission.is_some(),
				waiters: vec![tx],
				deferred: false,
			},
		);
		(PendingBreakpoint { key, rx }, submission)
	}

	/// Next queued breakpoint for the handshake, oldest first.
	pub fn next_for_handshake(&mut self) -> Option<Submission> {
		let entry = self
			.entries
			.values_mut()
			.find(|e| !e.submitting && e.breakpoint.protocol_id.is_none())?;
		entry.submitting = true;
		Some(Submission {
			key: entry.breakpoint.key,
			spec: entry.breakpoint.spec.clone(),
		})
	}

	/// Records the outcome of a submission.
	pub fn acknowledge(&mut self, key: BreakpointKey, result: Result<BreakpointAck>, mapper: &SourceMapper, notify: Notify) {
		match result {
			Ok(ack) => {
				let Some(entry) = self.entries.get_mut(&key) else {
					tracing::debug!(%key, id = %ack.id, "breakpoint acknowledged after removal");
					return;
				};
				entry.submitting = false;
				entry.breakpoint.protocol_id = Some(ack.id);
				entry.breakpoint.resolved = ack.resolved.map(|l| mapper.to_editor_location(&l));
				match notify {
					Notify::Now => {
						let snapshot = entry.breakpoint.clone();
						for waiter in entry.waiters.drain(..) {
							let _ = waiter.send(Ok(snapshot.clone()));
						}
					}
					Notify::Deferred => entry.deferred = true,
				}
			}
			Err(e) => {
				if let Some(entry) = self.entries.shift_remove(&key) {
					tracing::warn!(%key, path = %entry.breakpoint.spec.path, line = entry.breakpoint.spec.line, error = %e, "breakpoint rejected");
					let message = e.to_string();
					let mut error = Some(e);
					for waiter in entry.waiters {
						let e = error.take().unwrap_or_else(|| Error::remote(message.clone()));
						let _ = waiter.send(Err(e));
					}
				}
			}
		}
	}

	/// Marks the session running: delivers registrations held back during
	/// the handshake and returns breakpoints queued after it drained, which
	/// the caller must submit. Later additions are submitted directly.
	pub fn go_live(&mut self) -> Vec<Submission> {
		self.live = true;
		let mut late = Vec::new();
		for entry in self.entries.values_mut() {
			if entry.deferred {
				entry.deferred = false;
				let snapshot = entry.breakpoint.clone();
				for waiter in entry.waiters.drain(..) {
					let _ = waiter.send(Ok(snapshot.clone()));
				}
			} else if !entry.submitting && entry.breakpoint.protocol_id.is_none() {
				entry.submitting = true;
				late.push(Submission {
					key: entry.breakpoint.key,
					spec: entry.breakpoint.spec.clone(),
				});
			}
		}
		late
	}

	/// Drops a breakpoint and returns its backend id, if it had one.
	pub fn remove(&mut self, key: BreakpointKey) -> Result<Option<BreakpointId>> {
		let Some(entry) = self.entries.get(&key) else {
			return Err(Error::InvalidArgument(format!("no breakpoint {key}")));
		};
		if entry.submitting {
			return Err(Error::InvalidState {
				operation: "clear breakpoint",
				state: "registering".to_string(),
			});
		}

		let entry = self.entries.shift_remove(&key).ok_or_else(|| Error::InvalidArgument(format!("no breakpoint {key}")))?;
		for waiter in entry.waiters {
			let _ = waiter.send(Err(Error::InvalidArgument(format!("breakpoint {key} was cleared"))));
		}
		Ok(entry.breakpoint.protocol_id)
	}

	pub fn set_resolved(&mut self, id: &BreakpointId, location: EditorLocation) -> Option<BreakpointKey> {
		let entry = self
			.entries
			.values_mut()
			.find(|e| e.breakpoint.protocol_id.as_ref() == Some(id))?;
		entry.breakpoint.resolved = Some(location);
		Some(entry.breakpoint.key)
	}

	pub fn list(&self) -> Vec<Breakpoint> {
		self.entries.values().map(|e| e.breakpoint.clone()).collect()
	}

	/// Fails every waiter; nothing will be registered any more.
	pub fn close(&mut self) {
		self.live = false;
		for entry in self.entries.values_mut() {
			entry.submitting = false;
			entry.deferred = false;
			for waiter in entry.waiters.drain(..) {
				let _ = waiter.send(Err(Error::SessionClosed));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::location::ProtocolLocation;

	fn ack(id: &str) -> Result<BreakpointAck> {
		Ok(BreakpointAck {
			id: BreakpointId(id.to_string()),
			resolved: None,
		})
	}

	#[test]
	fn queued_until_handshake_in_insertion_order() {
		let mut registry = BreakpointRegistry::default();
		let (_a, submit_a) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		let (_b, submit_b) = registry.add(BreakpointSpec::new("/tmp/b.js", 7));
		assert!(submit_a.is_none() && submit_b.is_none());

		let first = registry.next_for_handshake().unwrap();
		assert_eq!(first.spec.path, "/tmp/a.js");
		let second = registry.next_for_handshake().unwrap();
		assert_eq!(second.spec.path, "/tmp/b.js");
		assert!(registry.next_for_handshake().is_none());

		let (_c, submit_c) = registry.add(BreakpointSpec::new("/tmp/c.js", 1));
		assert!(submit_c.is_none());
	}

	#[test]
	fn additions_after_the_drain_wait_for_go_live() {
		let mut registry = BreakpointRegistry::default();
		let (_a, _) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		let first = registry.next_for_handshake().unwrap();
		registry.acknowledge(first.key, ack("1"), &SourceMapper::Identity, Notify::Deferred);
		assert!(registry.next_for_handshake().is_none());

		let (late, submit) = registry.add(BreakpointSpec::new("/tmp/b.js", 7));
		assert!(submit.is_none());
		assert!(registry.list()[1].protocol_id.is_none());

		let submissions = registry.go_live();
		assert_eq!(submissions.len(), 1);
		assert_eq!(submissions[0].key, late.key);
		assert!(matches!(registry.remove(late.key), Err(Error::InvalidState { .. })));

		let (_c, submit_c) = registry.add(BreakpointSpec::new("/tmp/c.js", 1));
		assert!(submit_c.is_some());
	}

	#[test]
	fn each_breakpoint_is_handed_out_once() {
		let mut registry = BreakpointRegistry::default();
		registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		let submission = registry.next_for_handshake().unwrap();
		registry.acknowledge(submission.key, ack("1"), &SourceMapper::Identity, Notify::Deferred);
		assert!(registry.next_for_handshake().is_none());
	}

	#[tokio::test]
	async fn deferred_waiters_resolve_on_release() {
		let mut registry = BreakpointRegistry::default();
		let (mut pending, _) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		let submission = registry.next_for_handshake().unwrap();
		registry.acknowledge(submission.key, ack("9"), &SourceMapper::Identity, Notify::Deferred);

		assert!(pending.rx.try_recv().is_err());
		assert!(registry.go_live().is_empty());
		let breakpoint = pending.registered().await.unwrap();
		assert_eq!(breakpoint.protocol_id, Some(BreakpointId("9".to_string())));
	}

	#[tokio::test]
	async fn rejection_removes_entry() {
		let mut registry = BreakpointRegistry::default();
		registry.go_live();
		let (pending, submission) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		registry.acknowledge(
			submission.unwrap().key,
			Err(Error::remote("Error: no such script")),
			&SourceMapper::Identity,
			Notify::Now,
		);
		assert!(pending.registered().await.is_err());
		assert!(registry.list().is_empty());
	}

	#[test]
	fn remove_unregistered_sends_nothing() {
		let mut registry = BreakpointRegistry::default();
		let (pending, _) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		assert_eq!(registry.remove(pending.key).unwrap(), None);
		assert!(registry.remove(pending.key).is_err());
	}

	#[test]
	fn remove_while_registering_is_refused() {
		let mut registry = BreakpointRegistry::default();
		let (pending, _) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		registry.next_for_handshake();
		assert!(matches!(registry.remove(pending.key), Err(Error::InvalidState { .. })));
	}

	#[test]
	fn resolved_location_is_recorded() {
		let mut registry = BreakpointRegistry::default();
		let (pending, _) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		let submission = registry.next_for_handshake().unwrap();
		registry.acknowledge(
			submission.key,
			Ok(BreakpointAck {
				id: BreakpointId("bp-1".to_string()),
				resolved: Some(ProtocolLocation::new("/tmp/a.js", 3, 2)),
			}),
			&SourceMapper::Identity,
			Notify::Now,
		);
		let listed = registry.list();
		assert_eq!(listed[0].resolved, Some(EditorLocation::new("/tmp/a.js", 4, Some(3))));

		let key = registry.set_resolved(&BreakpointId("bp-1".to_string()), EditorLocation::new("/tmp/a.js", 5, Some(1)));
		assert_eq!(key, Some(pending.key));
	}

	#[tokio::test]
	async fn close_fails_waiters() {
		let mut registry = BreakpointRegistry::default();
		let (pending, _) = registry.add(BreakpointSpec::new("/tmp/a.js", 3));
		registry.close();
		assert!(pending.registered().await.unwrap_err().is_session_closed());
	}
}
