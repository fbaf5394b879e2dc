//! Durable per-job state so logs survive a process restart.
//!
//! Jobs are keyed by their identity digest, not their registration index:
//! editing the registration order of an app must not hand one job another
//! job's history. One JSON file per job, written temp-then-rename so a
//! crash mid-write cannot corrupt an existing record.

use crate::{
	error::{Error, Result},
	job::{Job, RunLogs},
};
use serde::{Deserialize, Serialize};
use std::{
	fs,
	path::PathBuf,
	sync::Arc,
};
use tracing::{debug, warn};

/// What gets persisted for each job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct JobRecord {
	pub logs: RunLogs,
	pub next_run_at: i64,
	pub is_enabled: bool,
}

/// Somewhere job records can be saved to and restored from.
pub trait StateStore: Send + Sync {
	/// Persist one job's current record.
	fn save(&self, job: &Job) -> Result<()>;

	/// Match persisted records to `jobs` by identity digest and apply them.
	/// A record that fails to decode is skipped so the rest still restore;
	/// persisted records with no matching job are left untouched.
	fn restore_all(&self, jobs: &[Arc<Job>]) -> Result<()>;
}

/// One file per job under an application-scoped directory.
#[derive(Clone, Debug)]
pub struct FileStore {
	dir: PathBuf,
}

impl FileStore {
	/// Store under the platform data directory, scoped by the running
	/// executable's name.
	pub fn for_current_app() -> Result<Self> {
		let app = std::env::current_exe()
			.ok()
			.and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
			.unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
		let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
		Self::at(base.join(app).join("duty-state"))
	}

	/// Store under an explicit directory, creating it if needed.
	pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
		let dir = dir.into();
		fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	fn path_for(&self, job: &Job) -> PathBuf {
		self.dir.join(format!("{}.json", job.digest()))
	}
}

impl StateStore for FileStore {
	fn save(&self, job: &Job) -> Result<()> {
		let path = self.path_for(job);
		let tmp = path.with_extension("json.tmp");
		let payload = serde_json::to_vec_pretty(&job.record())?;
		fs::write(&tmp, payload)?;
		fs::rename(&tmp, &path)?;
		debug!("saved state of {job}");
		Ok(())
	}

	fn restore_all(&self, jobs: &[Arc<Job>]) -> Result<()> {
		for job in jobs {
			let path = self.path_for(job);
			if !path.exists() {
				continue;
			}
			let record = fs::read(&path)
				.map_err(Error::from)
				.and_then(|bytes| Ok(serde_json::from_slice::<JobRecord>(&bytes)?));
			match record {
				Ok(record) => {
					job.apply_restored(record);
					debug!("restored state of {job}");
				}
				Err(error) => warn!("skipping unreadable state for {job}: {error}"),
			}
		}
		Ok(())
	}
}
