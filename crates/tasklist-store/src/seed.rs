//! Development reset: wipe the task collection and insert a fixed sample set.
//!
//! Never called from the request path.

use tracing::{info, warn};

use tasklist_core::{NewTask, Task};

use crate::error::StoreError;
use crate::tasks::TaskRepo;

pub const SAMPLE_TASKS: &[&str] = &[
    "Get a much needed haircut",
    "Finish writing that blog entry I've been putting off.",
    "Take the dogs our for a nice, long walk.",
    "Restock on good ol' black gold—caffeine!",
    "Pay off the credit card... cards.",
    "Do a few pushups. Preferably, more than a few.",
    "Create a web development portfolio.",
    "Attend some local Meetups and meet new friends!",
];

/// Outcome of a seeding run. Inserts that failed are not rolled back.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub wiped: usize,
    pub created: Vec<Task>,
    pub failed: usize,
}

impl SeedReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Delete all tasks, then insert [`SAMPLE_TASKS`] in order.
///
/// A failed wipe aborts the run. A failed insert is logged and counted, and
/// the remaining samples are still attempted.
pub fn seed(repo: &TaskRepo) -> Result<SeedReport, StoreError> {
    let wiped = repo.delete_all()?;
    info!(wiped, "task collection wiped");

    let mut report = SeedReport {
        wiped,
        ..Default::default()
    };

    for content in SAMPLE_TASKS {
        match repo.create(&NewTask::with_content(*content)) {
            Ok(task) => report.created.push(task),
            Err(e) => {
                warn!(error = %e, content, "sample task insert failed");
                report.failed += 1;
            }
        }
    }

    info!(
        created = report.created.len(),
        failed = report.failed,
        "seeding finished"
    );
    Ok(report)
}
