//! Notifications about changes to the browser model
use tokio::sync::mpsc;
use tracing::error;

use crate::{connection::ConnectionId, dn::Dn, entry::EntryId};

/// Something observers of a connection should know about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrowserEvent {
	/// The children of an entry were (re-)initialized
	ChildrenInitialized {
		/// The parent entry
		entry: EntryId,
	},
	/// The attributes of an entry were read
	AttributesInitialized {
		/// The entry
		entry: EntryId,
	},
	/// An entry got a new RDN
	EntryRenamed {
		/// DN before the rename
		old_dn: Dn,
		/// DN after the rename
		new_dn: Dn,
	},
	/// An entry was moved below another parent
	EntryMoved {
		/// DN before the move
		old_dn: Dn,
		/// DN after the move
		new_dn: Dn,
	},
	/// Many entries changed at once, observers should re-read everything
	BulkModification,
	/// A saved search was run
	SearchPerformed {
		/// Name of the search
		name: String,
	},
	/// A schema was loaded from the server
	SchemaLoaded,
	/// The schema was reset to the built-in default
	SchemaReset,
}

/// An event together with the connection it happened on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
	/// Source connection
	pub connection: ConnectionId,
	/// What happened
	pub event: BrowserEvent,
}

/// Events queued during a bulk operation, delivered when the batch is
/// dropped. Equal events are only queued once.
#[derive(Debug)]
pub struct EventBatch {
	/// Where the events go
	notifier: Notifier,
	/// Queued events in order
	events: Vec<BrowserEvent>,
}

impl EventBatch {
	/// Queue an event unless an equal one is already queued.
	pub fn push(&mut self, event: BrowserEvent) {
		if !self.events.contains(&event) {
			self.events.push(event);
		}
	}

	/// Queued events.
	#[must_use]
	pub fn events(&self) -> &[BrowserEvent] {
		&self.events
	}

	/// Drop the queued events without delivering them.
	pub fn discard(&mut self) {
		self.events.clear();
	}
}

impl Drop for EventBatch {
	fn drop(&mut self) {
		for event in self.events.drain(..) {
			self.notifier.send(event);
		}
	}
}

/// Delivers events of one connection to an optional observer channel.
#[derive(Clone, Debug)]
pub struct Notifier {
	/// Connection the events belong to
	connection: ConnectionId,
	/// Observer channel
	sender: Option<mpsc::Sender<Notification>>,
}

impl Notifier {
	/// A notifier for `connection`. Without a sender, events are dropped.
	#[must_use]
	pub fn new(connection: ConnectionId, sender: Option<mpsc::Sender<Notification>>) -> Self {
		Self { connection, sender }
	}

	/// A notifier and the receiving half of its channel.
	#[must_use]
	pub fn channel(connection: ConnectionId) -> (Self, mpsc::Receiver<Notification>) {
		let (sender, receiver) = mpsc::channel(1024);
		(Self::new(connection, Some(sender)), receiver)
	}

	/// Deliver one event right away.
	pub fn send(&self, event: BrowserEvent) {
		let Some(sender) = &self.sender else { return };
		let notification = Notification { connection: self.connection.clone(), event };
		if let Err(e) = sender.try_send(notification) {
			error!("Sending event failed: {e}");
		}
	}

	/// Start a batch. Its events are delivered exactly once, when the batch
	/// goes out of scope.
	#[must_use]
	pub fn batch(&self) -> EventBatch {
		EventBatch { notifier: self.clone(), events: Vec::new() }
	}
}
