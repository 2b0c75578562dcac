//! Progress reporting, error collection and cancellation for long running
//! operations
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// Handed to every operation. Errors are collected instead of aborting the
/// operation, so that the caller can show one notification per operation.
#[derive(Debug, Default)]
pub struct Monitor {
	/// Errors reported so far
	errors: Mutex<Vec<Error>>,
	/// Parent of the tokens of sub-monitors
	canceled: CancellationToken,
}

impl Monitor {
	/// A fresh monitor.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// A monitor with its own error list which is canceled together with
	/// this one. Used for best-effort steps whose errors must not reach the
	/// user. Canceling the sub-monitor leaves this one running.
	#[must_use]
	pub fn sub(&self) -> Self {
		Self { errors: Mutex::default(), canceled: self.canceled.child_token() }
	}

	/// Report what the operation is doing.
	pub fn report_progress(&self, message: &str) {
		debug!("{message}");
	}

	/// Record a failure.
	pub fn report_error(&self, error: Error) {
		warn!("{error}");
		self.lock().push(error);
	}

	/// Request cancellation.
	pub fn cancel(&self) {
		self.canceled.cancel();
	}

	/// Whether cancellation was requested.
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.canceled.is_cancelled()
	}

	/// Whether any error was reported.
	#[must_use]
	pub fn errors_reported(&self) -> bool {
		!self.lock().is_empty()
	}

	/// Number of reported errors.
	#[must_use]
	pub fn error_count(&self) -> usize {
		self.lock().len()
	}

	/// A description of the first reported error, the primary cause to show
	/// to the user.
	#[must_use]
	pub fn first_error(&self) -> Option<String> {
		self.lock().first().map(ToString::to_string)
	}

	/// Resolves once cancellation is requested.
	pub async fn canceled(&self) {
		self.canceled.cancelled().await;
	}

	/// Take all reported errors out of the monitor.
	pub fn take_errors(&self) -> Vec<Error> {
		std::mem::take(&mut *self.lock())
	}

	/// The error list. Poisoning is ignored, the list stays usable.
	fn lock(&self) -> MutexGuard<'_, Vec<Error>> {
		self.errors.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
