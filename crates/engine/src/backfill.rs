//! Backfill orchestrator: reconcile every active enrollment of the given
//! courses, one course at a time, in the order supplied.
//!
//! Counts in each [`CourseBackfillSummary`] cover that course only; run-wide
//! totals are on [`BackfillReport`].

use std::sync::Arc;

use serde::Serialize;

use prefsync_common::error::AppError;
use prefsync_common::types::{Job, JobHandle};

use crate::defaults::PreferenceDefaults;
use crate::enrollment::EnrollmentSource;
use crate::queue::JobQueue;
use crate::reconcile::Reconciler;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CourseBackfillSummary {
    pub course_id: String,
    pub enrollments: usize,
    pub created: usize,
    pub migrated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Defaults version every record was reconciled against.
    pub config_version: i32,
    pub courses: Vec<CourseBackfillSummary>,
}

impl BackfillReport {
    pub fn total_created(&self) -> usize {
        self.courses.iter().map(|c| c.created).sum()
    }

    pub fn total_migrated(&self) -> usize {
        self.courses.iter().map(|c| c.migrated).sum()
    }
}

#[derive(Clone)]
pub struct BackfillOrchestrator {
    enrollments: Arc<dyn EnrollmentSource>,
    reconciler: Reconciler,
    defaults: Arc<PreferenceDefaults>,
}

impl BackfillOrchestrator {
    pub fn new(
        enrollments: Arc<dyn EnrollmentSource>,
        reconciler: Reconciler,
        defaults: Arc<PreferenceDefaults>,
    ) -> Self {
        Self {
            enrollments,
            reconciler,
            defaults,
        }
    }

    /// Queue a backfill for `course_ids`. An empty list still enqueues a job,
    /// which completes as a no-op.
    pub async fn schedule(queue: &dyn JobQueue, course_ids: Vec<String>) -> Result<JobHandle, AppError> {
        let courses = course_ids.len();
        let handle = queue
            .enqueue(Job::CreateNotificationPreferences { course_ids })
            .await?;

        tracing::info!(job_id = %handle.job_id, courses, "Notification preference backfill scheduled");
        Ok(handle)
    }

    /// Run the backfill. Stops at the first storage fault; re-running is safe.
    pub async fn run(&self, course_ids: &[String]) -> Result<BackfillReport, AppError> {
        // One defaults snapshot per run.
        let defaults = self.defaults.current();
        let mut report = BackfillReport {
            config_version: defaults.version,
            courses: Vec::with_capacity(course_ids.len()),
        };

        tracing::info!(
            courses = course_ids.len(),
            config_version = defaults.version,
            "Running task create_notification_preferences"
        );

        for course_id in course_ids {
            let enrollments = self.enrollments.active_enrollments(course_id).await?;
            tracing::info!(
                course_id = %course_id,
                enrollments = enrollments.len(),
                "Creating notification preferences for course"
            );

            let mut summary = CourseBackfillSummary {
                course_id: course_id.clone(),
                enrollments: enrollments.len(),
                ..Default::default()
            };

            for enrollment in &enrollments {
                let outcome = self
                    .reconciler
                    .reconcile(enrollment.user_id, course_id, &defaults)
                    .await?;
                if outcome.created {
                    summary.created += 1;
                }
                if outcome.migrated {
                    summary.migrated += 1;
                }
            }

            tracing::info!(
                course_id = %summary.course_id,
                newly_created = summary.created,
                outdated_updated = summary.migrated,
                "Notification preference back-fill completed for course"
            );
            report.courses.push(summary);
        }

        tracing::info!(
            courses = report.courses.len(),
            newly_created = report.total_created(),
            outdated_updated = report.total_migrated(),
            "Completed task create_notification_preferences"
        );

        Ok(report)
    }
}
