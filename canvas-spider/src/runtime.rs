use std::path::{Path, PathBuf};

use anyhow::Context;
use canvas_core::{CanvasClient, Course, CourseStatus, Profile, Quota};

use crate::config::{ByteLimit, Config, Settings};
use crate::sync::builder::build_tree;
use crate::sync::fetch::{FetchExecutor, FetchReport, FileFailure};
use crate::sync::filter::{filter_files, ready_folders, select_courses};
use crate::sync::paths::sanitize_segment;
use crate::sync::tag::{TagPolicy, TagSummary, tag_tree};
use crate::sync::transfer::{CanvasSource, FsStore};

#[derive(Debug)]
pub struct CourseReport {
    pub course_id: u64,
    pub course_name: String,
    pub root: PathBuf,
    pub dropped_folders: usize,
    pub dropped_files: usize,
    pub renamed: usize,
    pub tags: TagSummary,
    pub fetch: FetchReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseFailure {
    pub course_id: u64,
    pub course_name: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub courses: Vec<CourseReport>,
    pub failed_courses: Vec<CourseFailure>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.failed_courses.is_empty() && self.courses.iter().all(|course| course.fetch.is_success())
    }

    pub fn files_fetched(&self) -> usize {
        self.courses.iter().map(|course| course.fetch.fetched.len()).sum()
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.courses
            .iter()
            .map(|course| course.fetch.bytes_fetched())
            .sum()
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileFailure> {
        self.courses.iter().flat_map(|course| course.fetch.failed.iter())
    }
}

pub struct SpiderRuntime {
    config: Config,
    client: CanvasClient,
}

impl SpiderRuntime {
    pub fn bootstrap(config: Config) -> anyhow::Result<Self> {
        let client = CanvasClient::new(
            config.authentication.url.as_str(),
            config.authentication.token.clone(),
        )
        .context("failed to create Canvas client")?;
        Ok(Self { config, client })
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub async fn courses(&self, status: CourseStatus) -> anyhow::Result<Vec<Course>> {
        self.client
            .list_courses(status)
            .await
            .context("failed to list courses")
    }

    pub async fn profile(&self) -> anyhow::Result<Profile> {
        self.client
            .get_profile()
            .await
            .context("failed to fetch user profile")
    }

    pub async fn quota(&self) -> anyhow::Result<Quota> {
        self.client
            .get_quota()
            .await
            .context("failed to fetch storage quota")
    }

    /// Mirrors every selected course under `baseDir`.
    ///
    /// A course whose listings cannot be fetched is recorded and skipped; the
    /// remaining courses still run. `maxTotalSize` is shared across courses.
    pub async fn download(&self) -> anyhow::Result<SyncSummary> {
        let settings = &self.config.settings;
        let courses = self.courses(CourseStatus::All).await?;
        let courses = select_courses(&settings.courses, courses);
        tracing::info!(
            courses = courses.len(),
            base_dir = %settings.base_dir.display(),
            "starting download"
        );

        let mut summary = SyncSummary::default();
        let mut budget = settings.max_total_size.bytes();

        for course in courses {
            let listings = tokio::try_join!(
                self.client.list_folders(course.id),
                self.client.list_files(course.id)
            );
            let (folders, files) = match listings {
                Ok(listings) => listings,
                Err(err) => {
                    tracing::warn!(course_id = course.id, course = %course.name, error = %err, "failed to list course contents");
                    summary.failed_courses.push(CourseFailure {
                        course_id: course.id,
                        course_name: course.name,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let files = filter_files(&settings.files, files);
            let folders = ready_folders(folders, &files);
            let root = course_root(&settings.base_dir, &course.name);
            let built = build_tree(root.to_string_lossy().into_owned(), &folders, &files);
            let mut tree = built.tree.materialize();

            let policy = TagPolicy {
                update: settings.update,
                max_file_size: settings.max_file_size,
                max_total_size: ByteLimit(budget),
            };
            let tags = tag_tree(&mut tree, &policy).await;
            budget = budget.map(|left| left.saturating_sub(tags.bytes_tagged));

            let executor = FetchExecutor::new(
                CanvasSource::new(self.client.clone()),
                FsStore,
                settings.max_concurrent_downloads,
            );
            let fetch = executor.execute(&tree).await;
            tracing::info!(
                course = %course.name,
                fetched = fetch.fetched.len(),
                failed = fetch.failed.len(),
                skipped_existing = tags.skipped_existing,
                "course done"
            );

            summary.courses.push(CourseReport {
                course_id: course.id,
                course_name: course.name,
                root,
                dropped_folders: built.dropped_folders,
                dropped_files: built.dropped_files,
                renamed: built.renamed,
                tags,
                fetch,
            });
        }

        Ok(summary)
    }
}

pub fn course_root(base_dir: &Path, course_name: &str) -> PathBuf {
    base_dir.join(sanitize_segment(course_name).as_ref())
}
