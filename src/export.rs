//! Exporting search results as LDIF
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, instrument};

use crate::{
	directory::Directory,
	error::Error,
	ldif::{write_record, VERSION_LINE},
	monitor::Monitor,
	search::{self, SearchParameter},
};

/// Run a search and write every result to `writer` as LDIF. All pages of a
/// paged search are exported, following the cookies the server hands out
/// until the count limit of the search is reached. Returns the number of
/// exported entries.
///
/// Search failures are reported to the monitor and end the export with what
/// was written so far. Only write failures are returned as errors.
#[instrument(skip_all, fields(base = %parameter.base))]
pub async fn export_ldif<W>(
	directory: &mut dyn Directory,
	parameter: &SearchParameter,
	writer: &mut W,
	monitor: &Monitor,
) -> Result<usize, Error>
where
	W: AsyncWrite + Unpin + Send,
{
	writer.write_all(format!("{VERSION_LINE}\n\n").as_bytes()).await?;

	let mut parameter = parameter.clone();
	if let Some(paged) = parameter.paged.as_mut() {
		paged.scroll_mode = false;
	}
	let limit = parameter.count_limit as usize;
	let mut exported = 0;
	loop {
		let outcome = search::execute(directory, &parameter, monitor).await;
		let remaining = if limit > 0 { limit.saturating_sub(exported) } else { usize::MAX };
		let mut chunk = String::new();
		for record in outcome.entries.iter().take(remaining) {
			write_record(&mut chunk, record);
			exported += 1;
		}
		writer.write_all(chunk.as_bytes()).await?;
		monitor.report_progress(&format!("Exported {exported} entries"));

		let Some(next) = parameter.next_page(&outcome) else { break };
		if monitor.is_canceled() || (limit > 0 && exported >= limit) || outcome.is_empty() {
			break;
		}
		parameter = parameter.with_page(next);
	}
	writer.flush().await?;
	info!(exported, "LDIF export finished");
	Ok(exported)
}
